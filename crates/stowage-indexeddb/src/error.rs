//! Mapping of IndexedDB failures onto `StorageError`
//!
//! IndexedDB reports failures as `DOMException`s whose `name` identifies the
//! kind of failure. Anything that is not a `DOMException` is stringified.

use stowage_core::storage::StorageError;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// A JS failure reduced to its exception name and message
#[derive(Debug, Clone)]
pub struct DomFailure {
    pub name: String,
    pub message: String,
}

impl DomFailure {
    pub fn from_js(val: &JsValue) -> Self {
        if let Some(e) = val.dyn_ref::<DomException>() {
            return DomFailure {
                name: e.name(),
                message: e.message(),
            };
        }
        let message = val.as_string().unwrap_or_else(|| {
            js_sys::JSON::stringify(val)
                .map(String::from)
                .unwrap_or_else(|_| format!("{:?}", val))
        });
        DomFailure {
            name: "Error".to_string(),
            message,
        }
    }

    pub fn cause(&self) -> String {
        format!("{}: {}", self.name, self.message)
    }

    /// Map onto a storage error for a request against `store`
    pub fn into_request_error(self, operation: &'static str, store: &str) -> StorageError {
        match self.name.as_str() {
            "ConstraintError" => StorageError::Constraint {
                store: store.to_string(),
                cause: self.cause(),
            },
            "DataError" | "DataCloneError" => StorageError::Data {
                store: store.to_string(),
                cause: self.cause(),
            },
            "ReadOnlyError" => StorageError::ReadOnly(store.to_string()),
            "NotFoundError" => StorageError::OutOfScope(store.to_string()),
            "TransactionInactiveError" | "InvalidStateError" => StorageError::TransactionInactive,
            "AbortError" => StorageError::Aborted(self.cause()),
            _ => StorageError::Request {
                operation,
                cause: self.cause(),
            },
        }
    }
}

/// Shorthand for request failures
pub fn request_error(operation: &'static str, store: &str, val: &JsValue) -> StorageError {
    DomFailure::from_js(val).into_request_error(operation, store)
}

/// Shorthand for open failures
pub fn open_error(database: &str, val: &JsValue) -> StorageError {
    StorageError::Open {
        database: database.to_string(),
        cause: DomFailure::from_js(val).cause(),
    }
}
