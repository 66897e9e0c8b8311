//! MessageHandler port - ユーザー callback

use std::future::Future;

use async_trait::async_trait;

use crate::domain::BoxedMessage;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Application logic invoked once per received message.
///
/// `Ok(())` means "processed" and lets the worker acknowledge the message
/// (peek-lock only). `Err` leaves it to the bus to redeliver after the lock
/// expires. Messages can be delivered more than once, so handlers should be
/// idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BoxedMessage) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// ```ignore
/// let handler = handler_fn(|msg: BoxedMessage| async move {
///     println!("{:?}", msg.payload());
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(BoxedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(BoxedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: BoxedMessage) -> Result<(), HandlerError> {
        (self.f)(message).await
    }
}
