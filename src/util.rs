use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::Future;
use futures::FutureExt;
use tracing::error;

use crate::error::{AppError, AppResult, RUNTIME_PANIC};

pub(crate) fn panic_payload(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn app_error_from_panic(payload: Box<dyn Any + Send>) -> AppError {
    let message = panic_payload(payload.as_ref());
    error!(target: "punchpass", event = "panic_caught", message = %message);
    AppError::new(RUNTIME_PANIC, message)
}

pub fn dispatch_with_fence<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}

pub async fn dispatch_async_with_fence<F, Fut, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let fut = dispatch_with_fence(|| AssertUnwindSafe(f()).catch_unwind())?;
    match fut.await {
        Ok(value) => Ok(value),
        Err(payload) => Err(app_error_from_panic(payload)),
    }
}

/// Runs a collaborator call so that a panic surfaces as a `RUNTIME/PANIC` error.
pub async fn dispatch_async_app_result<F, Fut, T>(f: F) -> AppResult<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    dispatch_async_with_fence(f).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::panic_any;

    #[test]
    fn dispatch_with_fence_passes_through() {
        let value = dispatch_with_fence(|| 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn dispatch_with_fence_catches_str_panic() {
        let err = dispatch_with_fence(|| panic!("boom"))
            .err()
            .expect("should convert panic into error");
        assert_eq!(err.code(), RUNTIME_PANIC);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn dispatch_with_fence_catches_non_string_panic() {
        let err = dispatch_with_fence(|| panic_any(123_i32))
            .err()
            .expect("should convert panic into error");
        assert_eq!(err.message(), "unknown panic payload");
    }

    #[tokio::test]
    async fn async_fence_catches_panicking_future() {
        let err = dispatch_async_app_result(|| async {
            if true {
                panic!("provider exploded");
            }
            Ok::<_, AppError>(1)
        })
        .await
        .expect_err("panic becomes error");
        assert_eq!(err.code(), RUNTIME_PANIC);
        assert_eq!(err.message(), "provider exploded");
    }

    #[tokio::test]
    async fn async_fence_keeps_inner_errors() {
        let err = dispatch_async_app_result(|| async {
            Err::<(), _>(AppError::new("QUERY/FAILED", "nope"))
        })
        .await
        .expect_err("inner error");
        assert_eq!(err.code(), "QUERY/FAILED");
    }
}
