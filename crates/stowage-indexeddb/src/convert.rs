//! Conversion between Stowage values and JS values
//!
//! Rows are stored as plain JS objects so the structured-clone algorithm can
//! persist them and key paths resolve against their properties. Dates map to
//! `Date` objects so date keys order the way IndexedDB orders them.

use js_sys::{Array, Object, Reflect};
use stowage_core::storage::{Key, StorageError, StorageResult};
use stowage_core::{Fields, Value};
use wasm_bindgen::{JsCast, JsValue};

pub fn value_to_js(value: &Value) -> StorageResult<JsValue> {
    Ok(match value {
        Value::Null => JsValue::NULL,
        Value::Bool(b) => JsValue::from_bool(*b),
        Value::Number(n) => JsValue::from_f64(*n),
        Value::String(s) => JsValue::from_str(s),
        Value::Date(d) => {
            js_sys::Date::new(&JsValue::from_f64(d.timestamp_millis() as f64)).into()
        }
        Value::Array(items) => {
            let arr = Array::new();
            for item in items {
                arr.push(&value_to_js(item)?);
            }
            arr.into()
        }
        Value::Object(fields) => fields_to_js(fields)?,
    })
}

pub fn fields_to_js(fields: &Fields) -> StorageResult<JsValue> {
    let obj = Object::new();
    for (name, value) in fields {
        set_prop(&obj, name, &value_to_js(value)?)?;
    }
    Ok(obj.into())
}

pub fn value_from_js(val: &JsValue) -> StorageResult<Value> {
    if val.is_null() || val.is_undefined() {
        return Ok(Value::Null);
    }
    if let Some(b) = val.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Some(n) = val.as_f64() {
        return Ok(Value::Number(n));
    }
    if let Some(s) = val.as_string() {
        return Ok(Value::String(s));
    }
    if let Some(date) = val.dyn_ref::<js_sys::Date>() {
        return Ok(Key::Date(date.get_time() as i64).to_value());
    }
    if Array::is_array(val) {
        let arr: &Array = val.unchecked_ref();
        return arr
            .iter()
            .map(|item| value_from_js(&item))
            .collect::<StorageResult<Vec<_>>>()
            .map(Value::Array);
    }
    if val.is_object() {
        return fields_from_js(val).map(Value::Object);
    }
    Err(conversion_error(format!("unsupported value {:?}", val)))
}

pub fn fields_from_js(val: &JsValue) -> StorageResult<Fields> {
    let obj: &Object = val
        .dyn_ref::<Object>()
        .ok_or_else(|| conversion_error("row is not an object".to_string()))?;
    let mut fields = Fields::new();
    for name in Object::keys(obj).iter() {
        let Some(key) = name.as_string() else {
            continue;
        };
        let prop = Reflect::get(obj, &name).map_err(|e| conversion_error(format!("{:?}", e)))?;
        fields.insert(key, value_from_js(&prop)?);
    }
    Ok(fields)
}

pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
        Key::Date(ms) => js_sys::Date::new(&JsValue::from_f64(*ms as f64)).into(),
    }
}

pub fn key_from_js(store: &str, val: &JsValue) -> StorageResult<Key> {
    if let Some(n) = val.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = val.as_string() {
        return Ok(Key::String(s));
    }
    if let Some(date) = val.dyn_ref::<js_sys::Date>() {
        return Ok(Key::Date(date.get_time() as i64));
    }
    Err(StorageError::Data {
        store: store.to_string(),
        cause: format!("unsupported key {:?}", val),
    })
}

pub fn set_prop(obj: &Object, name: &str, val: &JsValue) -> StorageResult<()> {
    Reflect::set(obj, &JsValue::from_str(name), val)
        .map(|_| ())
        .map_err(|e| conversion_error(format!("set {}: {:?}", name, e)))
}

fn conversion_error(cause: String) -> StorageError {
    StorageError::Request {
        operation: "convert",
        cause,
    }
}
