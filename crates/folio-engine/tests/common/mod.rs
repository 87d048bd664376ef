//! Shared helpers for the folio-engine integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use folio_common::{EngineConfig, FolioError, FolioResult, IndexKey};
use folio_engine::{Engine, KeyExtractor};
use folio_storage::{MemoryStreamFactory, Stream, StreamFactory};

/// Installs a test-writer subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test document.
#[derive(Debug, Clone, Serialize)]
pub struct Person {
    pub name: String,
    pub age: i64,
    pub email: String,
    pub tags: Vec<String>,
}

impl Person {
    pub fn new(name: &str, age: i64) -> Self {
        Self {
            name: name.to_string(),
            age,
            email: format!("{name}@example.com"),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }
}

/// Extracts keys from JSON documents. Expressions are `$.field`; an array
/// field yields one key per element.
#[derive(Debug, Default)]
pub struct JsonKeyExtractor;

fn json_key(value: &Value) -> Option<IndexKey> {
    match value {
        Value::Null => Some(IndexKey::Null),
        Value::Bool(b) => Some(IndexKey::Boolean(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(IndexKey::Int64(i)),
            None => n.as_f64().map(IndexKey::Double),
        },
        Value::String(s) => Some(IndexKey::String(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

impl KeyExtractor for JsonKeyExtractor {
    fn extract(&self, expression: &str, document: &[u8]) -> FolioResult<Vec<IndexKey>> {
        let field = expression
            .strip_prefix("$.")
            .ok_or_else(|| FolioError::invalid_argument(format!("bad expression {expression}")))?;
        let value: Value = serde_json::from_slice(document)
            .map_err(|e| FolioError::invalid_argument(format!("document is not JSON: {e}")))?;

        Ok(match value.get(field) {
            None => Vec::new(),
            Some(Value::Array(items)) => items.iter().filter_map(json_key).collect(),
            Some(other) => json_key(other).into_iter().collect(),
        })
    }
}

/// Opens an in-memory engine with the JSON extractor.
pub fn memory_engine() -> Engine {
    init_tracing();
    Engine::builder(EngineConfig::for_testing())
        .key_extractor(Arc::new(JsonKeyExtractor))
        .open()
        .unwrap()
}

/// Copies the bytes of `factory` into a new, independent factory, as a
/// process that died right now would leave them.
pub fn crash_copy(factory: &MemoryStreamFactory) -> MemoryStreamFactory {
    let copy = MemoryStreamFactory::new(format!("{}-copy", factory.name()));
    let bytes = factory.to_vec();
    if !bytes.is_empty() {
        copy.open().unwrap().write_at(&bytes, 0).unwrap();
    }
    copy
}

/// Memory streams whose writes start failing once armed.
#[derive(Debug, Clone)]
pub struct FailingStreamFactory {
    inner: MemoryStreamFactory,
    failing: Arc<AtomicBool>,
}

impl FailingStreamFactory {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryStreamFactory::new(name),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every later write and sync fail.
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::Release);
    }
}

impl StreamFactory for FailingStreamFactory {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn open(&self) -> FolioResult<Arc<dyn Stream>> {
        Ok(Arc::new(FailingStream {
            inner: self.inner.open()?,
            failing: Arc::clone(&self.failing),
        }))
    }
}

struct FailingStream {
    inner: Arc<dyn Stream>,
    failing: Arc<AtomicBool>,
}

impl FailingStream {
    fn check(&self) -> FolioResult<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }
        Ok(())
    }
}

impl Stream for FailingStream {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> FolioResult<()> {
        self.inner.read_at(buf, offset)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> FolioResult<()> {
        self.check()?;
        self.inner.write_at(buf, offset)
    }

    fn len(&self) -> FolioResult<u64> {
        self.inner.len()
    }

    fn set_len(&self, len: u64) -> FolioResult<()> {
        self.check()?;
        self.inner.set_len(len)
    }

    fn sync(&self) -> FolioResult<()> {
        self.check()?;
        self.inner.sync()
    }
}
