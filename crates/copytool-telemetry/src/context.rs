//! Span helpers shared across the copytool.

use tracing::Span;
use tracing::span::Entered;

use crate::init::build_sha;

/// RAII guard keeping the process-wide `copytool` span entered.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the process span for the lifetime of the guard.
    #[must_use]
    pub fn new(mount: &str, fs_name: &str) -> Self {
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "copytool",
            mount = %mount,
            fs_name = %fs_name,
            build_sha = %build_sha()
        )));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Span wrapping the processing of one action item.
#[must_use]
pub fn action_span(fid: &str, cookie: u64, action: &str) -> Span {
    tracing::info_span!("action", fid = %fid, cookie = cookie, action = %action)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_enters_and_exits() {
        let guard = GlobalContextGuard::new("/mnt/lustre", "lustre");
        {
            let span = action_span("0x1:0x2:0x0", 7, "ARCHIVE");
            let _entered = span.enter();
            tracing::info!("inside action span");
        }
        drop(guard);
    }
}
