//! Per-database connection pool (spec §4.F): an opaque facade over "a
//! database", since the actual storage engine is out of scope for this crate
//! (spec §1). `DatabasePool` owns at most one writable handle and a small set
//! of read-only handles, opened lazily and released back to the pool when
//! their borrow guard drops. Grounded in
//! `original_source/REST/DatabaseRegistry.hh`'s `DBShare`/`BorrowedDatabase`
//! pair, minus the actual C4Database I/O.
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// An opaque handle to an open database connection. What it actually wraps
/// (a SQLite connection, a storage-engine handle) is outside this crate's
/// scope; callers only ever see it through a [`Borrowed`] guard.
#[derive(Debug)]
pub struct DbHandle {
    pub name: String,
    pub writeable: bool,
}

struct Inner {
    name: String,
    writer: Option<DbHandle>,
    writer_in_use: bool,
    readers: Vec<DbHandle>,
    max_readers: usize,
}

/// Lazily opens up to one writer and `max_readers` readers for a single
/// named database.
pub struct DatabasePool {
    inner: Mutex<Inner>,
}

impl DatabasePool {
    pub fn new(name: impl Into<String>, max_readers: usize) -> Arc<Self> {
        Arc::new(DatabasePool {
            inner: Mutex::new(Inner {
                name: name.into(),
                writer: None,
                writer_in_use: false,
                readers: Vec::new(),
                max_readers,
            }),
        })
    }

    /// Opens (or reuses) the read-only handle and scopes it to the guard's lifetime.
    pub fn borrow(self: &Arc<Self>) -> Result<Borrowed> {
        let mut inner = self.inner.lock().unwrap();
        let handle = inner.readers.pop().unwrap_or_else(|| DbHandle { name: inner.name.clone(), writeable: false });
        Ok(Borrowed { pool: self.clone(), handle: Some(handle) })
    }

    /// Opens (or reuses) the single writable handle. Only one writer may be
    /// borrowed at a time; a second call while the first is still held
    /// returns `Busy` rather than queuing (mailboxes upstream serialize
    /// writers in practice).
    pub fn borrow_writeable(self: &Arc<Self>) -> Result<Borrowed> {
        let mut inner = self.inner.lock().unwrap();
        if inner.writer_in_use {
            return Err(Error::LiteCore {
                code: crate::error::LiteCoreCode::Busy,
                message: format!("writer already checked out for database: {}", inner.name),
            });
        }
        let handle = match inner.writer.take() {
            Some(h) => h,
            None => DbHandle { name: inner.name.clone(), writeable: true },
        };
        inner.writer_in_use = true;
        Ok(Borrowed { pool: self.clone(), handle: Some(handle) })
    }

    fn release(&self, handle: DbHandle) {
        let mut inner = self.inner.lock().unwrap();
        if handle.writeable {
            inner.writer = Some(handle);
            inner.writer_in_use = false;
        } else if inner.readers.len() < inner.max_readers {
            inner.readers.push(handle);
        }
    }
}

/// RAII guard around a borrowed [`DbHandle`]; returns it to the pool on drop.
pub struct Borrowed {
    pool: Arc<DatabasePool>,
    handle: Option<DbHandle>,
}

impl std::ops::Deref for Borrowed {
    type Target = DbHandle;
    fn deref(&self) -> &DbHandle {
        self.handle.as_ref().expect("handle taken only on drop")
    }
}

impl Drop for Borrowed {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.release(handle);
        }
    }
}

pub fn map_not_found(name: &str) -> Error {
    Error::not_found(format!("no such database: {name}"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn writer_handle_is_reused_after_release() {
        let pool = DatabasePool::new("db", 2);
        {
            let w = pool.borrow_writeable().unwrap();
            assert!(w.writeable);
        }
        let w2 = pool.borrow_writeable().unwrap();
        assert!(w2.writeable);
    }

    #[test]
    fn second_concurrent_writer_is_refused_as_busy() {
        let pool = DatabasePool::new("db", 2);
        let _held = pool.borrow_writeable().unwrap();
        let err = pool.borrow_writeable().unwrap_err();
        assert_eq!(err.http_status(), 423);
    }

    #[test]
    fn reader_pool_is_bounded() {
        let pool = DatabasePool::new("db", 1);
        let r1 = pool.borrow().unwrap();
        drop(r1);
        let r2 = pool.borrow().unwrap();
        assert!(!r2.writeable);
    }
}
