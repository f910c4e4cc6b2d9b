//! page/checksum — CRC32C страницы CBM.
//!
//! Digest считается по page[OFF_IS_LAST..PAGE_SIZE] (всё после поля CRC:
//! заголовок с is_last_in_batch и битовая карта) и хранится в первых
//! 4 байтах страницы (LE).

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{CBM_PAGE_SIZE, OFF_IS_LAST, OFF_PAGE_CRC};

#[inline]
pub fn page_crc(page: &[u8; CBM_PAGE_SIZE]) -> u32 {
    crc32c::crc32c(&page[OFF_IS_LAST..])
}

/// Пересчитать и вписать CRC страницы.
#[inline]
pub fn page_update_crc(page: &mut [u8; CBM_PAGE_SIZE]) {
    let digest = page_crc(page);
    LittleEndian::write_u32(&mut page[OFF_PAGE_CRC..OFF_PAGE_CRC + 4], digest);
}

/// Прочитать сохранённый CRC страницы.
#[inline]
pub fn page_stored_crc(page: &[u8; CBM_PAGE_SIZE]) -> u32 {
    LittleEndian::read_u32(&page[OFF_PAGE_CRC..OFF_PAGE_CRC + 4])
}

/// Проверить CRC. true = ок.
#[inline]
pub fn page_verify_crc(page: &[u8; CBM_PAGE_SIZE]) -> bool {
    page_stored_crc(page) == page_crc(page)
}
