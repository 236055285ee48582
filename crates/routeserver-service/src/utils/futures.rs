use std::future::Future;
use std::time::Instant;

/// Execute a callback on dropping of the container type.
///
/// The callback must not panic under any circumstance. Since it is called while dropping an item,
/// this might result in aborting program execution.
pub struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    /// Creates a new `CallOnDrop`.
    pub fn new<F: FnOnce() + Send + 'static>(f: F) -> CallOnDrop {
        CallOnDrop {
            f: Some(Box::new(f)),
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

/// Runs `f`, emitting its duration as `<task_name>.duration` timer tagged with `status`.
///
/// The status is derived from the output of the future by `get_status`.
pub async fn measure<T, F>(task_name: &'static str, get_status: fn(&T) -> &'static str, f: F) -> T
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = f.await;
    let status = get_status(&output);
    metric!(
        timer(&format!("{task_name}.duration")) = start.elapsed(),
        "status" => status,
    );
    output
}

/// Status extractors for [`measure`].
pub mod m {
    /// `ok` for successful results, `err` otherwise.
    pub fn result<T, E>(result: &Result<T, E>) -> &'static str {
        match result {
            Ok(_) => "ok",
            Err(_) => "err",
        }
    }
}
