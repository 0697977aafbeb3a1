//! Lock-protected value containers with change notification.
//!
//! Every value that crosses a thread boundary on the stand (setpoints, PID
//! gains, published outputs, sensor histories) lives in one of these. Locks
//! are held only for the duration of a single read, write or closure.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

type Observer<T> = Box<dyn Fn(&T) + Send + Sync>;

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds a single value and notifies observers whenever it is written.
pub struct SignalModel<T> {
    data: Mutex<T>,
    observers: Mutex<Vec<Observer<T>>>,
}

impl<T: Clone> SignalModel<T> {
    pub fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Copy of the current value.
    pub fn get(&self) -> T {
        lock(&self.data).clone()
    }

    pub fn set(&self, data: T) {
        let mut data_lk = lock(&self.data);
        *data_lk = data;
        let snapshot = data_lk.clone();
        drop(data_lk);

        self.notify(&snapshot);
    }

    /// Read the value in place while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&lock(&self.data))
    }

    /// Mutate the value in place while holding the lock, then notify.
    ///
    /// Anything done inside `f` is ordered against every other `with` /
    /// `update` on this model.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut data_lk = lock(&self.data);
        let ret = f(&mut data_lk);
        let snapshot = data_lk.clone();
        drop(data_lk);

        self.notify(&snapshot);

        ret
    }

    /// Register a callback run after every write.
    pub fn on_change(&self, f: impl Fn(&T) + Send + Sync + 'static) {
        lock(&self.observers).push(Box::new(f));
    }

    fn notify(&self, data: &T) {
        for observer in lock(&self.observers).iter() {
            observer(data);
        }
    }
}

impl<T: Clone + Default> Default for SignalModel<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Append-only sequence that drops its oldest entry once `maxlen` is exceeded.
pub struct ListModel<T> {
    data: Mutex<VecDeque<T>>,
    maxlen: Option<usize>,
    observers: Mutex<Vec<Observer<usize>>>,
}

impl<T: Clone> ListModel<T> {
    pub fn new(maxlen: Option<usize>) -> Self {
        Self {
            data: Mutex::new(VecDeque::new()),
            maxlen,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, value: T) {
        let mut data_lk = lock(&self.data);
        data_lk.push_back(value);

        if let Some(maxlen) = self.maxlen {
            while data_lk.len() > maxlen {
                data_lk.pop_front();
            }
        }

        let len = data_lk.len();
        drop(data_lk);

        self.notify(len);
    }

    /// Most recent entry, if any.
    pub fn last(&self) -> Option<T> {
        lock(&self.data).back().cloned()
    }

    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.data).iter().cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.data).clear();
        self.notify(0);
    }

    pub fn len(&self) -> usize {
        lock(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.data).is_empty()
    }

    /// Register a callback run after every change, given the new length.
    pub fn on_change(&self, f: impl Fn(&usize) + Send + Sync + 'static) {
        lock(&self.observers).push(Box::new(f));
    }

    fn notify(&self, len: usize) {
        for observer in lock(&self.observers).iter() {
            observer(&len);
        }
    }
}
