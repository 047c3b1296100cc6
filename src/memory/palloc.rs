//! The page allocator.
//!
//! Physical memory is split into two fixed pools: the kernel pool
//! (thread stacks, kernel buffers) and the user pool (process frames).
//! Each pool is a flat byte arena with a word bitmap of used pages.
//! Running the user pool dry is what triggers frame eviction; running
//! the kernel pool dry fails `thread_create` with OutOfMemory.

use bit_field::BitField;
use lazy_static::lazy_static;
use spin::Mutex;

use super::PGSIZE;

/// Which pool a page came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Kernel,
    User,
}

/// A page obtained from [`get_page`]; returned with [`free_page`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    pool: Pool,
    index: usize,
}

struct PagePool {
    bytes: Vec<u8>,
    used: Vec<u64>,
    pages: usize,
    free: usize,
}

impl PagePool {
    fn empty() -> PagePool {
        PagePool {
            bytes: Vec::new(),
            used: Vec::new(),
            pages: 0,
            free: 0,
        }
    }

    fn init(&mut self, pages: usize) {
        assert!(self.pages == 0, "pool initialized twice");
        self.bytes = vec![0u8; pages * PGSIZE];
        self.used = vec![0u64; pages.div_ceil(64)];
        self.pages = pages;
        self.free = pages;
    }

    fn alloc(&mut self) -> Option<usize> {
        if self.free == 0 {
            return None;
        }
        for index in 0..self.pages {
            if !self.used[index / 64].get_bit(index % 64) {
                self.used[index / 64].set_bit(index % 64, true);
                self.free -= 1;
                return Some(index);
            }
        }
        unreachable!("free count out of sync with bitmap");
    }

    fn release(&mut self, index: usize) {
        assert!(self.used[index / 64].get_bit(index % 64), "double free");
        self.used[index / 64].set_bit(index % 64, false);
        self.free += 1;
    }

    fn page_mut(&mut self, index: usize) -> &mut [u8] {
        assert!(self.used[index / 64].get_bit(index % 64), "page not allocated");
        &mut self.bytes[index * PGSIZE..(index + 1) * PGSIZE]
    }
}

lazy_static! {
    static ref KERNEL_POOL: Mutex<PagePool> = Mutex::new(PagePool::empty());
    static ref USER_POOL: Mutex<PagePool> = Mutex::new(PagePool::empty());
}

fn pool_of(pool: Pool) -> &'static Mutex<PagePool> {
    match pool {
        Pool::Kernel => &KERNEL_POOL,
        Pool::User => &USER_POOL,
    }
}

pub fn init(kernel_pages: usize, user_pages: usize) {
    KERNEL_POOL.lock().init(kernel_pages);
    USER_POOL.lock().init(user_pages);
    log::debug!(
        "palloc: {} kernel pages, {} user pages",
        kernel_pages,
        user_pages
    );
}

/// Allocate one page, or None when the pool is exhausted. The page's
/// contents are whatever the previous owner left there.
pub fn get_page(pool: Pool) -> Option<PageHandle> {
    let index = pool_of(pool).lock().alloc()?;
    Some(PageHandle { pool, index })
}

/// Return a page to its pool.
pub fn free_page(page: PageHandle) {
    pool_of(page.pool).lock().release(page.index);
}

/// Run `f` over the page's bytes. The pool lock is held for the
/// duration, so `f` must not sleep.
pub fn with_page<R>(page: PageHandle, f: impl FnOnce(&mut [u8]) -> R) -> R {
    let mut pool = pool_of(page.pool).lock();
    f(pool.page_mut(page.index))
}

/// Free pages remaining in a pool.
pub fn free_pages(pool: Pool) -> usize {
    pool_of(pool).lock().free
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_and_reuse() {
        let mut pool = PagePool::empty();
        pool.init(3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_eq!(pool.alloc(), None);

        pool.page_mut(b).fill(0xAB);
        pool.release(b);
        let again = pool.alloc().unwrap();
        assert_eq!(again, b);
        assert_eq!(pool.page_mut(again)[0], 0xAB);

        pool.release(a);
        pool.release(c);
        assert_eq!(pool.free, 2);
    }
}
