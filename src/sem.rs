//! Счётный семафор поверх Mutex + Condvar.
//!
//! В std нет counting semaphore, а весь протокол hand-off/ready/sync в этом
//! транспорте построен на post/wait парах. Паника отравленного мьютекса здесь
//! допустима: отравление возможно только при панике другого потока, после
//! которой миграция в любом случае мертва.

use std::sync::{Condvar, Mutex};

pub struct Semaphore {
    count: Mutex<u64>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: u64) -> Self {
        Self {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Увеличить счётчик и разбудить одного ожидающего.
    pub fn post(&self) {
        let mut g = self.count.lock().unwrap();
        *g += 1;
        self.cv.notify_one();
    }

    /// Ждать, пока счётчик станет > 0, и уменьшить его.
    pub fn wait(&self) {
        let mut g = self.count.lock().unwrap();
        while *g == 0 {
            g = self.cv.wait(g).unwrap();
        }
        *g -= 1;
    }

    /// Неблокирующий вариант wait().
    pub fn try_wait(&self) -> bool {
        let mut g = self.count.lock().unwrap();
        if *g > 0 {
            *g -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn post_then_wait() {
        let s = Semaphore::new(0);
        s.post();
        s.post();
        s.wait();
        s.wait();
        assert!(!s.try_wait());
    }

    #[test]
    fn wait_blocks_until_post() {
        let s = Arc::new(Semaphore::new(0));
        let s2 = s.clone();
        let t = thread::spawn(move || {
            s2.wait();
            true
        });
        thread::sleep(std::time::Duration::from_millis(50));
        s.post();
        assert!(t.join().unwrap());
    }

    #[test]
    fn initial_count_consumed() {
        let s = Semaphore::new(3);
        assert!(s.try_wait());
        assert!(s.try_wait());
        assert!(s.try_wait());
        assert!(!s.try_wait());
    }
}
