//! ram — именованные блоки гостевой памяти и их реестр.
//!
//! RamBlock — непрерывный регион host-памяти фиксированной длины (anonymous
//! mmap), в который транспорт кладёт страницы по (block, offset). Реестр
//! отвечает на lookup по имени из заголовка пакета.
//!
//! Многопоточность: recv-воркеры пишут страницы прямо в память блока из
//! нескольких потоков без блокировок. Страницы одного пакета — различные
//! offsets, а получатель не исполняет гостевой код во время переноса, поэтому
//! пересекающиеся записи разных каналов дают last-writer-wins — это контракт
//! протокола. Срезы страниц строятся из сырого указателя mmap-региона, а не
//! из &mut на весь маппинг, так что одновременные срезы разных страниц не
//! алиасятся.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use memmap2::MmapMut;

use crate::consts::RAMBLOCK_NAME_LEN;

pub struct RamBlock {
    name: String,
    page_size: usize,
    mem: MmapMut,
}

impl RamBlock {
    /// Создать блок на anonymous mmap длиной `len` (кратной `page_size`).
    pub fn new_anon(name: &str, len: usize, page_size: usize) -> Result<Arc<Self>> {
        if name.is_empty() || name.len() >= RAMBLOCK_NAME_LEN {
            return Err(anyhow!(
                "ram block name must be 1..{} bytes, got {}",
                RAMBLOCK_NAME_LEN,
                name.len()
            ));
        }
        if len == 0 || page_size == 0 || len % page_size != 0 {
            return Err(anyhow!(
                "ram block length {} must be a non-zero multiple of page size {}",
                len,
                page_size
            ));
        }
        let mem = MmapMut::map_anon(len)
            .map_err(|e| anyhow!("mmap anon {} bytes for block '{}': {}", len, name, e))?;
        Ok(Arc::new(Self {
            name: name.to_string(),
            page_size,
            mem,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn used_length(&self) -> u64 {
        self.mem.len() as u64
    }

    /// Offset валиден, если страница целиком лежит внутри блока.
    pub fn page_in_bounds(&self, offset: u64) -> bool {
        offset <= self.used_length() - self.page_size as u64
    }

    /// Указатель на страницу внутри mmap-региона.
    ///
    /// # Safety
    /// `offset` должен проходить page_in_bounds().
    unsafe fn page_ptr(&self, offset: u64) -> *mut u8 {
        (self.mem.as_ptr() as *mut u8).add(offset as usize)
    }

    /// Срез страницы для чтения.
    ///
    /// # Safety
    /// `offset` в границах блока; страницу никто не пишет, пока срез жив.
    pub unsafe fn page_slice(&self, offset: u64) -> &[u8] {
        std::slice::from_raw_parts(self.page_ptr(offset), self.page_size)
    }

    /// Срез страницы для записи.
    ///
    /// # Safety
    /// `offset` в границах блока; единственный писатель этой страницы на
    /// время жизни среза (offsets одного пакета различны, см. заголовок
    /// модуля).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page_slice_mut(&self, offset: u64) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.page_ptr(offset), self.page_size)
    }

    /// Записать страницу (bounds-checked). Для наполнения блока до старта
    /// миграции и для тестов; не для горячего пути.
    pub fn write_page(&self, offset: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.page_size {
            return Err(anyhow!(
                "write_page: payload {} != page size {}",
                data.len(),
                self.page_size
            ));
        }
        if !self.page_in_bounds(offset) {
            return Err(anyhow!(
                "write_page: offset {} out of block '{}' (used_length {})",
                offset,
                self.name,
                self.used_length()
            ));
        }
        unsafe { self.page_slice_mut(offset).copy_from_slice(data) };
        Ok(())
    }

    /// Прочитать страницу в буфер (bounds-checked).
    pub fn read_page(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        if out.len() != self.page_size {
            return Err(anyhow!(
                "read_page: buffer {} != page size {}",
                out.len(),
                self.page_size
            ));
        }
        if !self.page_in_bounds(offset) {
            return Err(anyhow!(
                "read_page: offset {} out of block '{}' (used_length {})",
                offset,
                self.name,
                self.used_length()
            ));
        }
        out.copy_from_slice(unsafe { self.page_slice(offset) });
        Ok(())
    }

    /// FNV-1a по всему блоку — для сверки содержимого на двух сторонах.
    /// Звать вне активного переноса.
    pub fn digest(&self) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in self.mem.iter() {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }
}

/// Реестр блоков: имя из заголовка пакета -> блок.
#[derive(Default)]
pub struct RamRegistry {
    blocks: Mutex<HashMap<String, Arc<RamBlock>>>,
}

impl RamRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, block: Arc<RamBlock>) -> Result<()> {
        let mut g = self.blocks.lock().unwrap();
        if g.contains_key(block.name()) {
            return Err(anyhow!("ram block '{}' already registered", block.name()));
        }
        g.insert(block.name().to_string(), block);
        Ok(())
    }

    pub fn lookup_block(&self, name: &str) -> Option<Arc<RamBlock>> {
        self.blocks.lock().unwrap().get(name).cloned()
    }
}
