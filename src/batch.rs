//! Батч страниц одного ram-блока, ожидающих передачи.
//!
//! Ёмкость фиксируется при создании и больше не меняется; экземпляр живёт всю
//! миграцию и гуляет между контроллером и слотом канала через mem::swap
//! ("горячая картошка": ровно один владелец в любой момент).

use std::sync::Arc;

use crate::ram::RamBlock;

pub struct PageBatch {
    block: Option<Arc<RamBlock>>,
    offsets: Vec<u64>,
    capacity: usize,
}

impl PageBatch {
    pub fn new(capacity: usize) -> Self {
        Self {
            block: None,
            offsets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.offsets.len() == self.capacity
    }

    pub fn block(&self) -> Option<&Arc<RamBlock>> {
        self.block.as_ref()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Добавить страницу. false означает "сначала flush, затем повтор":
    /// батч полон либо уже привязан к другому блоку.
    pub fn enqueue(&mut self, block: &Arc<RamBlock>, offset: u64) -> bool {
        match &self.block {
            None => {
                self.block = Some(block.clone());
                self.offsets.push(offset);
                true
            }
            Some(bound) => {
                if !Arc::ptr_eq(bound, block) || self.is_full() {
                    return false;
                }
                self.offsets.push(offset);
                true
            }
        }
    }

    /// Очистить после передачи; вызывается только владельцем.
    pub fn reset(&mut self) {
        self.offsets.clear();
        self.block = None;
    }
}
