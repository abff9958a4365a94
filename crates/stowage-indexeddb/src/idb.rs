//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use js_sys::Promise;
use stowage_core::storage::{StorageError, StorageResult};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbVersionChangeEvent,
};

use crate::error::{open_error, DomFailure};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;
type VersionClosure = Closure<dyn FnMut(IdbVersionChangeEvent)>;

/// Called inside `onupgradeneeded` with the database, the version-change
/// transaction, and the old and new versions.
pub type UpgradeFn = Box<dyn Fn(&IdbDatabase, &IdbTransaction, u32, u32) -> StorageResult<()>>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> StorageResult<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| StorageError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(StorageError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| StorageError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Convert an IdbRequest into a JS Promise that resolves with the request's
/// result and rejects with its `DOMException`.
pub fn request_to_promise(req: &IdbRequest) -> Promise {
    let req_success = req.clone();
    let req_error = req.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req_success.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req_error.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject.call1(&JsValue::UNDEFINED, &request_failure(&req_e));
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req_success.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req_error.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        // keep both closures alive until one fires
        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue, JsValue> {
    JsFuture::from(request_to_promise(req)).await
}

/// Convert an IdbTransaction's outcome into a JS Promise.
///
/// Resolves on `complete`; rejects on `abort`, which also follows any
/// unhandled request error.
pub fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx_complete = tx.clone();
    let tx_abort = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            *closures_for_complete.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let tx_a = tx_abort.clone();
        let closures_for_abort = closures.clone();
        let on_abort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let reason = tx_a
                .error()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("transaction aborted"));
            let _ = reject.call1(&JsValue::UNDEFINED, &reason);
            *closures_for_abort.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx_complete.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx_abort.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_abort));
    })
}

fn request_failure(req: &IdbRequest) -> JsValue {
    req.error()
        .ok()
        .flatten()
        .map(JsValue::from)
        .unwrap_or_else(|| JsValue::from_str("unknown IDB error"))
}

/// Like `request_to_promise` for open and delete requests, which can also be
/// blocked by other connections.
///
/// A blocked request rejects at once and records the version the blocking
/// connections hold in `blocked`. The request itself cannot be cancelled: if
/// it succeeds later, the resulting database is closed straight away.
fn open_request_to_promise(req: &IdbOpenDbRequest, blocked: Rc<Cell<Option<u32>>>) -> Promise {
    let req = req.clone();

    Promise::new(&mut move |resolve, reject| {
        type OpenClosures = (EventClosure, EventClosure, VersionClosure);
        let closures: Rc<RefCell<Option<OpenClosures>>> = Rc::new(RefCell::new(None));

        let req_s = req.clone();
        let blocked_s = blocked.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            if blocked_s.get().is_some() {
                if let Some(db) = result.dyn_ref::<IdbDatabase>() {
                    db.close();
                }
            } else {
                let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            }
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let closures_for_error = closures.clone();
        let reject_error = reject.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject_error.call1(&JsValue::UNDEFINED, &request_failure(&req_e));
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let blocked_b = blocked.clone();
        let on_blocked = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            blocked_b.set(Some(event.old_version() as u32));
            let _ = reject.call1(&JsValue::UNDEFINED, &JsValue::from_str("blocked"));
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_success, on_error, on_blocked));
    })
}

/// Open (or create) a database, running `upgrade` inside `onupgradeneeded`.
///
/// An error from `upgrade` aborts the version-change transaction and is
/// returned in place of the resulting `AbortError`.
pub async fn open_database(
    name: &str,
    version: Option<u32>,
    upgrade: UpgradeFn,
) -> StorageResult<IdbDatabase> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = match version {
        Some(v) => factory.open_with_u32(name, v),
        None => factory.open(name),
    }
    .map_err(|e| open_error(name, &e))?;

    let blocked: Rc<Cell<Option<u32>>> = Rc::new(Cell::new(None));
    let upgrade_failure: Rc<RefCell<Option<StorageError>>> = Rc::new(RefCell::new(None));

    let blocked_u = blocked.clone();
    let failure_slot = upgrade_failure.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let Some(req) = event
            .target()
            .and_then(|t| t.dyn_into::<IdbOpenDbRequest>().ok())
        else {
            return;
        };
        let Some(tx) = req.transaction() else {
            return;
        };
        // a late upgrade after a blocked rejection must not touch the catalogue
        if blocked_u.get().is_some() {
            let _ = tx.abort();
            return;
        }
        let Ok(db) = req.result().and_then(|r| r.dyn_into::<IdbDatabase>()) else {
            let _ = tx.abort();
            return;
        };
        let old = event.old_version() as u32;
        let new = event.new_version().map(|v| v as u32).unwrap_or(old);
        if let Err(e) = upgrade(&db, &tx, old, new) {
            *failure_slot.borrow_mut() = Some(e);
            let _ = tx.abort();
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));

    let result = JsFuture::from(open_request_to_promise(&open_req, blocked.clone())).await;

    if blocked.get().is_some() {
        // the pending request may still fire onupgradeneeded
        on_upgrade.forget();
    } else {
        open_req.set_onupgradeneeded(None);
        drop(on_upgrade);
    }

    if let Some(e) = upgrade_failure.borrow_mut().take() {
        return Err(e);
    }

    match result {
        Ok(db) => db
            .dyn_into::<IdbDatabase>()
            .map_err(|_| StorageError::Open {
                database: name.to_string(),
                cause: "result is not IdbDatabase".into(),
            }),
        Err(e) => {
            if let Some(current) = blocked.get() {
                return Err(StorageError::Blocked {
                    database: name.to_string(),
                    requested: version.unwrap_or(current),
                    current,
                });
            }
            let failure = DomFailure::from_js(&e);
            if failure.name == "VersionError" {
                return Err(StorageError::VersionMismatch {
                    database: name.to_string(),
                    requested: version.unwrap_or(0),
                    current: stored_version(name).await.unwrap_or(0),
                });
            }
            Err(StorageError::Open {
                database: name.to_string(),
                cause: failure.cause(),
            })
        }
    }
}

/// Version currently stored for `name`, probed with an unversioned open
async fn stored_version(name: &str) -> Option<u32> {
    let factory = idb_factory().ok()?;
    let req = factory.open(name).ok()?;
    let db = JsFuture::from(open_request_to_promise(&req, Rc::new(Cell::new(None))))
        .await
        .ok()?
        .dyn_into::<IdbDatabase>()
        .ok()?;
    let version = db.version() as u32;
    db.close();
    Some(version)
}

/// Delete a database by name. Deleting an absent database succeeds.
pub async fn delete_database(name: &str) -> StorageResult<()> {
    let factory = idb_factory()?;

    let req = factory
        .delete_database(name)
        .map_err(|e| open_error(name, &e))?;

    let blocked: Rc<Cell<Option<u32>>> = Rc::new(Cell::new(None));
    let result = JsFuture::from(open_request_to_promise(&req, blocked.clone())).await;

    match result {
        Ok(_) => Ok(()),
        // the blocked event does not say how many connections remain
        Err(_) if blocked.get().is_some() => Err(StorageError::DeleteBlocked {
            database: name.to_string(),
            connections: 1,
        }),
        Err(e) => Err(open_error(name, &e)),
    }
}
