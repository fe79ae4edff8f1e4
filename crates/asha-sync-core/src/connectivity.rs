//! Connectivity oracle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Reports whether the network is reachable. Must be cheap and side-effect free.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Online state pushed in by the platform's network callback.
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl<T: Connectivity + ?Sized> Connectivity for Arc<T> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl Connectivity for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOffline;

impl Connectivity for AlwaysOffline {
    fn is_online(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_toggles() {
        let flag = ConnectivityFlag::new(false);
        assert!(!flag.is_online());
        flag.set_online(true);
        assert!(flag.is_online());
    }

    #[test]
    fn test_shared_flag() {
        let flag = Arc::new(ConnectivityFlag::default());
        let oracle: Arc<dyn Connectivity> = flag.clone();
        flag.set_online(false);
        assert!(!oracle.is_online());
        assert!(AlwaysOnline.is_online());
        assert!(!AlwaysOffline.is_online());
    }
}
