//! Message trait for payload types.

use serde::{Serialize, de::DeserializeOwned};

/// A payload that can be published and routed.
///
/// The type name is stamped into the `payload-type-name` header and is half of
/// the key handlers are registered under, so it must be stable across the
/// services that exchange it. By default it is the simple type name
/// (`orders::CreateOrder` becomes `CreateOrder`).
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct CreateOrder { id: u64 }
///
/// impl Message for CreateOrder {}
/// ```
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a valid Message",
    label = "must be `Serialize + DeserializeOwned + Send + Sync + 'static`",
    note = "Implement `Message` for `{Self}` or use `#[derive(Message)]`."
)]
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The stable name used for routing.
    fn type_name() -> &'static str {
        simple_type_name::<Self>()
    }
}

// Common Message implementations
impl Message for String {}
impl Message for serde_json::Value {}

/// The last path segment of a type's name, without generic arguments.
pub fn simple_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    mod orders {
        use serde::{Deserialize, Serialize};

        #[derive(Serialize, Deserialize)]
        pub struct CreateOrder {
            pub id: u64,
        }
    }

    impl Message for orders::CreateOrder {}

    #[derive(Serialize, Deserialize)]
    struct Renamed;

    impl Message for Renamed {
        fn type_name() -> &'static str {
            "LegacyName"
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Wrapper<T> {
        inner: T,
    }

    #[test]
    fn test_default_name_strips_module_path() {
        assert_eq!(orders::CreateOrder::type_name(), "CreateOrder");
    }

    #[test]
    fn test_name_can_be_overridden() {
        assert_eq!(Renamed::type_name(), "LegacyName");
    }

    #[test]
    fn test_simple_name_strips_generics() {
        assert_eq!(simple_type_name::<Wrapper<u32>>(), "Wrapper");
        assert_eq!(simple_type_name::<String>(), "String");
    }
}
