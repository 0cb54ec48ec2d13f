//! Cluster execution backend for kubot.
//!
//! Runs commands inside pods through the `kubectl` binary so the blocking
//! exec stream lives in a child process instead of on the async runtime.

pub mod kubectl_dispatcher;

pub use kubectl_dispatcher::{classify_kubectl_failure, KubectlDispatcher, KubectlDispatcherConfig};
