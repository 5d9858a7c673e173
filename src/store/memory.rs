//! In-process [`Store`] with API server semantics
//!
//! Records are kept as JSON keyed by (kind, namespace, name). Every write bumps
//! a global resourceVersion counter. The behaviours the reconcilers depend on
//! are reproduced:
//!
//! - `replace`/`replace_status` fail with 409 Conflict on a stale version
//! - `replace` keeps the stored status, `replace_status` keeps everything else
//! - `create` drops any status and fails with 409 AlreadyExists on a taken name
//! - `delete` of a record with finalizers only sets `deletionTimestamp`; the
//!   record disappears once a replace leaves the finalizer list empty
//! - new finalizers cannot be added to a record that is being deleted

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use kube::error::ErrorResponse;
use serde_json::Value;

use super::{Record, Store};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl ObjectKey {
    fn new<K: Record>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            kind: K::kind(&()).to_string(),
            namespace: if K::NAMESPACED {
                namespace.map(str::to_string)
            } else {
                None
            },
            name: name.to_string(),
        }
    }

    fn of<K: Record>(obj: &K) -> Self {
        Self::new::<K>(obj.namespace().as_deref(), &obj.name_any())
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    version: u64,
    injected_conflicts: BTreeMap<ObjectKey, u32>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Consume one injected conflict for `key`, if any are pending
    fn take_conflict(&mut self, key: &ObjectKey) -> bool {
        match self.injected_conflicts.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

/// In-memory [`Store`]; clones share the same underlying records
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` conditional writes to the record fail with 409
    pub fn inject_conflicts<K: Record>(&self, namespace: Option<&str>, name: &str, count: u32) {
        self.lock()
            .injected_conflicts
            .insert(ObjectKey::new::<K>(namespace, name), count);
    }

    /// Number of stored records of kind `K`
    pub fn count<K: Record>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .count()
    }
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

fn not_found(key: &ObjectKey) -> kube::Error {
    api_error(
        404,
        "NotFound",
        format!("{} \"{}\" not found", key.kind, key.name),
    )
}

fn conflict(key: &ObjectKey) -> kube::Error {
    api_error(
        409,
        "Conflict",
        format!(
            "Operation cannot be fulfilled on {} \"{}\": the object has been modified; \
             please apply your changes to the latest version and try again",
            key.kind, key.name
        ),
    )
}

fn decode<K: Record>(value: Value) -> Result<K, kube::Error> {
    serde_json::from_value(value).map_err(kube::Error::SerdeError)
}

fn encode<K: Record>(obj: &K) -> Result<Value, kube::Error> {
    serde_json::to_value(obj).map_err(kube::Error::SerdeError)
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata")?.get(field)?.as_str()
}

fn finalizers(value: &Value) -> Vec<String> {
    value
        .get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .map(|f| {
            f.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn set_metadata(value: &mut Value, field: &str, v: Value) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), v);
    }
}

fn copy_metadata(from: &Value, to: &mut Value, field: &str) {
    match from.get("metadata").and_then(|m| m.get(field)) {
        Some(v) => set_metadata(to, field, v.clone()),
        None => {
            if let Some(meta) = to.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.remove(field);
            }
        }
    }
}

fn set_status(value: &mut Value, status: Option<Value>) {
    if let Some(obj) = value.as_object_mut() {
        match status {
            Some(s) if !s.is_null() => {
                obj.insert("status".to_string(), s);
            }
            _ => {
                obj.remove("status");
            }
        }
    }
}

/// Check the caller's resourceVersion against the stored one.
///
/// A missing version on the incoming object is an unconditional write.
fn check_version(
    inner: &mut Inner,
    key: &ObjectKey,
    stored: &Value,
    incoming: &Value,
) -> Result<(), kube::Error> {
    if inner.take_conflict(key) {
        return Err(conflict(key));
    }
    match metadata_str(incoming, "resourceVersion") {
        Some(rv) if Some(rv) != metadata_str(stored, "resourceVersion") => Err(conflict(key)),
        _ => Ok(()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get<K: Record>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        let key = ObjectKey::new::<K>(namespace, name);
        let value = self.lock().objects.get(&key).cloned();
        value.map(decode::<K>).transpose()
    }

    async fn list<K: Record>(&self, namespace: Option<&str>) -> Result<Vec<K>, kube::Error> {
        let kind = K::kind(&()).to_string();
        let values: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind)
            .filter(|(k, _)| match namespace {
                Some(ns) if K::NAMESPACED => k.namespace.as_deref() == Some(ns),
                _ => true,
            })
            .map(|(_, v)| v.clone())
            .collect();
        values.into_iter().map(decode::<K>).collect()
    }

    async fn create<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = ObjectKey::of(obj);
        if key.name.is_empty() {
            return Err(api_error(
                422,
                "Invalid",
                format!("{}: metadata.name: Required value", key.kind),
            ));
        }

        let mut value = encode(obj)?;
        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(api_error(
                409,
                "AlreadyExists",
                format!("{} \"{}\" already exists", key.kind, key.name),
            ));
        }

        let version = inner.next_version();
        set_status(&mut value, None);
        set_metadata(&mut value, "resourceVersion", Value::String(version.clone()));
        set_metadata(&mut value, "uid", Value::String(format!("uid-{version}")));
        set_metadata(
            &mut value,
            "creationTimestamp",
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.remove("deletionTimestamp");
            if !K::NAMESPACED {
                meta.remove("namespace");
            }
        }

        inner.objects.insert(key, value.clone());
        decode(value)
    }

    async fn replace<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = ObjectKey::of(obj);
        let mut value = encode(obj)?;
        let mut inner = self.lock();
        let stored = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        check_version(&mut inner, &key, &stored, &value)?;

        if metadata_str(&stored, "deletionTimestamp").is_some() {
            let existing = finalizers(&stored);
            if let Some(added) = finalizers(&value).iter().find(|f| !existing.contains(f)) {
                return Err(api_error(
                    422,
                    "Invalid",
                    format!(
                        "{} \"{}\": Forbidden: no new finalizers can be added if the object is being deleted, found new finalizers [\"{}\"]",
                        key.kind, key.name, added
                    ),
                ));
            }
        }

        set_status(&mut value, stored.get("status").cloned());
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            copy_metadata(&stored, &mut value, field);
        }
        let version = inner.next_version();
        set_metadata(&mut value, "resourceVersion", Value::String(version));

        if metadata_str(&value, "deletionTimestamp").is_some() && finalizers(&value).is_empty() {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, value.clone());
        }
        decode(value)
    }

    async fn replace_status<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        let key = ObjectKey::of(obj);
        let incoming = encode(obj)?;
        let mut inner = self.lock();
        let mut value = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        check_version(&mut inner, &key, &value, &incoming)?;

        set_status(&mut value, incoming.get("status").cloned());
        let version = inner.next_version();
        set_metadata(&mut value, "resourceVersion", Value::String(version));
        inner.objects.insert(key, value.clone());
        decode(value)
    }

    async fn delete<K: Record>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), kube::Error> {
        let key = ObjectKey::new::<K>(namespace, name);
        let mut inner = self.lock();
        let mut value = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;

        if finalizers(&value).is_empty() {
            inner.objects.remove(&key);
            return Ok(());
        }

        if metadata_str(&value, "deletionTimestamp").is_none() {
            set_metadata(
                &mut value,
                "deletionTimestamp",
                Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
            let version = inner.next_version();
            set_metadata(&mut value, "resourceVersion", Value::String(version));
            inner.objects.insert(key, value);
        }
        Ok(())
    }
}
