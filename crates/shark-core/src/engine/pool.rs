use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// A pool of reusable scratch objects handed out through scoped checkouts.
pub struct ObjectPool<T> {
    items: Mutex<Vec<T>>,
    factory: Box<dyn Fn() -> T + Send + Sync>,
}

impl<T> ObjectPool<T> {
    pub fn new(factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            factory: Box::new(factory),
        }
    }

    /// Takes an idle object, or builds a new one if none is idle. The object returns to the
    /// pool when the checkout is dropped.
    pub fn checkout(&self) -> Checkout<'_, T> {
        let item = self.items.lock().pop().unwrap_or_else(|| (self.factory)());
        Checkout {
            pool: self,
            item: Some(item),
        }
    }

    pub fn idle(&self) -> usize {
        self.items.lock().len()
    }
}

pub struct Checkout<'a, T> {
    pool: &'a ObjectPool<T>,
    item: Option<T>,
}

impl<T> Deref for Checkout<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Checkout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.items.lock().push(item);
        }
    }
}
