//! Panic traps around plugin calls
//!
//! Every call from the pipeline into plugin code goes through one of
//! these helpers, so a crash inside a plugin becomes
//! [`PluginError::Panicked`] instead of unwinding a worker task.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use virta_core::PluginError;

fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run a synchronous plugin call, converting a panic into an error.
pub(crate) fn call<T>(f: impl FnOnce() -> T) -> Result<T, PluginError> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| PluginError::Panicked(describe_panic(payload.as_ref())))
}

/// Drive an async plugin call, converting a panic into an error.
pub(crate) async fn call_async<F: Future>(future: F) -> Result<F::Output, PluginError> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| PluginError::Panicked(describe_panic(payload.as_ref())))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn sync_call_passes_value_through() {
        assert_eq!(call(|| 41 + 1).unwrap(), 42);
    }

    #[test]
    fn sync_panic_becomes_error() {
        let err = call(|| -> u32 { panic!("boom") }).unwrap_err();
        assert_eq!(err, PluginError::Panicked("boom".to_string()));
    }

    #[test]
    fn formatted_panic_payload_is_captured() {
        let err = call(|| -> u32 { panic!("bad index {}", 7) }).unwrap_err();
        assert_eq!(err, PluginError::Panicked("bad index 7".to_string()));
    }

    #[tokio::test]
    async fn async_panic_becomes_error() {
        let err = call_async(async { panic!("async boom") }).await.unwrap_err();
        assert_eq!(err, PluginError::Panicked("async boom".to_string()));
    }

    #[tokio::test]
    async fn async_call_passes_value_through() {
        let value = call_async(async { "ok" }).await.unwrap();
        assert_eq!(value, "ok");
    }
}
