//! Runtime feature flags the coordinator can list and toggle.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use tether_proto::ErrorBody;
use tether_proto::ErrorCode;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Feature flag not found: {0}")]
    NotFound(String),
}

impl From<Error> for ErrorBody {
    fn from(e: Error) -> Self {
        ErrorBody::new(ErrorCode::NotFound, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone)]
struct Flag {
    enabled: bool,
    listener: Option<Listener>,
}

#[derive(Default)]
pub struct FeatureFlags {
    flags: DashMap<String, Flag>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a flag with its default value. Re-registering resets the
    /// value but keeps an installed listener.
    pub fn register(&self, name: impl Into<String>, default: bool) {
        let name = name.into();
        let listener = self.flags.get(&name).and_then(|f| f.listener.clone());
        self.flags.insert(name, Flag { enabled: default, listener });
    }

    /// Installs a callback invoked with the new value after each toggle.
    pub fn on_change(&self, name: &str, listener: impl Fn(bool) + Send + Sync + 'static) -> Result<()> {
        let mut flag = self.flags.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        flag.listener = Some(Arc::new(listener));
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.flags.get(name).map(|f| f.enabled)
    }

    pub fn list(&self) -> BTreeMap<String, bool> {
        self.flags.iter().map(|f| (f.key().clone(), f.enabled)).collect()
    }

    /// Sets the flag to `enabled`, or flips it when `None`. Returns the new value.
    pub fn toggle(&self, name: &str, enabled: Option<bool>) -> Result<bool> {
        let (value, listener) = {
            let mut flag = self.flags.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
            flag.enabled = enabled.unwrap_or(!flag.enabled);
            (flag.enabled, flag.listener.clone())
        };
        tracing::info!(flag = name, enabled = value, "feature flag toggled");

        if let Some(listener) = listener {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(value))).is_err() {
                tracing::warn!(flag = name, "feature flag listener panicked");
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn toggle_flips_or_sets() {
        let flags = FeatureFlags::new();
        flags.register("dark_mode", false);
        assert_eq!(flags.toggle("dark_mode", None), Ok(true));
        assert_eq!(flags.toggle("dark_mode", None), Ok(false));
        assert_eq!(flags.toggle("dark_mode", Some(true)), Ok(true));
        assert_eq!(flags.toggle("dark_mode", Some(true)), Ok(true));
        assert_eq!(flags.is_enabled("dark_mode"), Some(true));
    }

    #[test]
    fn unknown_flag_is_not_found() {
        let flags = FeatureFlags::new();
        let err = flags.toggle("ghost", None).unwrap_err();
        assert_eq!(ErrorBody::from(err).code, ErrorCode::NotFound);
    }

    #[test]
    fn listener_sees_new_value() {
        let flags = FeatureFlags::new();
        flags.register("beta", false);
        let seen = Arc::new(AtomicBool::new(false));
        let sink = seen.clone();
        flags.on_change("beta", move |v| sink.store(v, Ordering::SeqCst)).unwrap();

        flags.toggle("beta", None).unwrap();
        assert!(seen.load(Ordering::SeqCst));
        assert_eq!(flags.list().get("beta"), Some(&true));
    }
}
