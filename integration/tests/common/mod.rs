use std::str::FromStr;
use std::sync::{Arc, Mutex};

use sqlite_relay::{Connection, ExecutionContext, Storage};
use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // if LOG_LEVEL env var is set, use it
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        tracing_subscriber::fmt().with_max_level(Level::from_str(&level).unwrap()).with_test_writer().init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).with_test_writer().init();
    }
}

#[allow(unused)]
pub async fn open_memory() -> anyhow::Result<Connection> { Ok(Connection::open(Storage::Memory, &ExecutionContext::current()?).await?) }

/// Accumulates whatever an observer sees, in arrival order
#[derive(Clone)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

#[allow(unused)]
impl<T: Clone> Recorder<T> {
    pub fn new() -> Self { Self { items: Arc::new(Mutex::new(Vec::new())) } }

    pub fn push(&self, item: T) { self.items.lock().unwrap().push(item); }

    pub fn len(&self) -> usize { self.items.lock().unwrap().len() }

    pub fn take(&self) -> Vec<T> { std::mem::take(&mut *self.items.lock().unwrap()) }
}

/// Counts calls from any thread
#[derive(Clone, Default)]
pub struct Counter(Arc<std::sync::atomic::AtomicUsize>);

#[allow(unused)]
impl Counter {
    pub fn new() -> Self { Self::default() }

    pub fn hit(&self) { self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst); }

    pub fn get(&self) -> usize { self.0.load(std::sync::atomic::Ordering::SeqCst) }
}
