//! per connection attribute table.

use core::any::Any;
use core::fmt;

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// attribute key of the per connection state record attached by the service handler.
pub const CONN_STATE: &str = "bridge.conn-state";

/// attribute slot holding the [RequestLine](crate::http::RequestLine) of the
/// request being serviced. written by the worker before the pipelines run so
/// response interceptors can consult the request head.
pub const HTTP_REQUEST: &str = "http.request";

/// String keyed attribute table scoped to a connection. Shared between the reactor
/// thread and the worker servicing the connection.
#[derive(Default)]
pub struct Context {
    map: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<&'static str, Box<dyn Any + Send + Sync>>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert<T>(&self, key: &'static str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map().insert(key, Box::new(value));
    }

    /// Clone the attribute stored under `key`. None when absent or of another type.
    pub fn get<T>(&self, key: &'static str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.map().get(key).and_then(|value| value.downcast_ref::<T>()).cloned()
    }

    /// Take the attribute stored under `key` out of the table. An entry of another
    /// type is left in place.
    pub fn remove<T>(&self, key: &'static str) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        let mut map = self.map();
        if !map.get(key).is_some_and(|value| value.is::<T>()) {
            return None;
        }
        map.remove(key).and_then(|value| value.downcast::<T>().ok()).map(|value| *value)
    }

    pub fn contains(&self, key: &'static str) -> bool {
        self.map().contains_key(key)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.map();
        f.debug_set().entries(map.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let ctx = Context::new();
        ctx.insert("foo", 996_usize);

        assert!(ctx.contains("foo"));
        assert_eq!(ctx.get::<usize>("foo"), Some(996));
        assert_eq!(ctx.get::<String>("foo"), None);

        assert_eq!(ctx.remove::<usize>("foo"), Some(996));
        assert!(!ctx.contains("foo"));
        assert_eq!(ctx.remove::<usize>("foo"), None);
    }

    #[test]
    fn typed_remove_leaves_mismatch() {
        let ctx = Context::new();
        ctx.insert("foo", "bar".to_string());

        assert_eq!(ctx.remove::<usize>("foo"), None);
        assert_eq!(ctx.get::<String>("foo"), Some("bar".to_string()));
    }

    #[test]
    fn replaces_existing() {
        let ctx = Context::new();
        ctx.insert("foo", 1_u32);
        ctx.insert("foo", 2_u32);
        assert_eq!(ctx.get::<u32>("foo"), Some(2));
    }
}
