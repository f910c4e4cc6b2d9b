//! page/bitmap — операции над битовой картой страницы.
//!
//! Блочные номера всюду абсолютные; позиция внутри страницы берётся по
//! модулю CBM_BLOCKS_PER_PAGE (LE-порядок битов: бит i байта b покрывает
//! блок first_block + 8*b + i).

use std::cmp::Ordering;

use crate::consts::{CBM_BLOCKS_PER_PAGE, INVALID_BLOCK};

/// Первый блок страницы, накрывающей blk.
#[inline]
pub fn page_first_block(blk: u32) -> u32 {
    blk - blk % CBM_BLOCKS_PER_PAGE
}

#[inline]
fn byte_of(blk: u32) -> usize {
    ((blk % CBM_BLOCKS_PER_PAGE) / 8) as usize
}

#[inline]
fn bit_of(blk: u32) -> u32 {
    blk % 8
}

#[inline]
pub fn set_bit(bitmap: &mut [u8], blk: u32) {
    bitmap[byte_of(blk)] |= 1u8 << bit_of(blk);
}

#[inline]
pub fn clear_bit(bitmap: &mut [u8], blk: u32) {
    bitmap[byte_of(blk)] &= !(1u8 << bit_of(blk));
}

#[inline]
pub fn test_bit(bitmap: &[u8], blk: u32) -> bool {
    bitmap[byte_of(blk)] & (1u8 << bit_of(blk)) != 0
}

/// Монотонное объединение: dst |= src.
pub fn or_into(dst: &mut [u8], src: &[u8]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d |= *s;
    }
}

/// Сравнение first_block с учётом сентинела: lifecycle-страницы
/// (INVALID_BLOCK) упорядочиваются ПЕРЕД битовыми. На этом держится
/// порядок flush внутри entry: drop/truncate батча попадает в файл раньше
/// битовых страниц того же тега и при merge применяется первым.
#[inline]
pub fn cbm_blkno_cmp(a: u32, b: u32) -> Ordering {
    match (a == INVALID_BLOCK, b == INVALID_BLOCK) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(&b),
    }
}

/// Итератор по выставленным битам в диапазоне [next_blk, end_blk].
pub struct CbmBitmapIter<'a> {
    bitmap: &'a [u8],
    next_blk: u32,
    end_blk: u32,
}

impl<'a> CbmBitmapIter<'a> {
    pub fn new(bitmap: &'a [u8], first_blk: u32, end_blk: u32) -> Self {
        Self {
            bitmap,
            next_blk: first_blk,
            end_blk,
        }
    }
}

impl Iterator for CbmBitmapIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next_blk <= self.end_blk {
            let blk = self.next_blk;
            self.next_blk += 1;
            if test_bit(self.bitmap, blk) {
                return Some(blk);
            }
        }
        None
    }
}
