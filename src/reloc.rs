//! The relocation table: 4-byte word indices in `[load_size, total_size)`. Each one names an
//! 8-byte slot in the loaded region holding a base-relative address.

use byteorder::{ByteOrder, LittleEndian};
use tracing::trace;

use crate::{error::LoadError, image::RELOCATION_ENTRY_SIZE};

pub fn entries(image: &[u8], load_size: u64, total_size: u64) -> impl Iterator<Item = u32> + '_ {
    image[load_size as usize..total_size as usize]
        .chunks_exact(RELOCATION_ENTRY_SIZE as usize)
        .map(LittleEndian::read_u32)
}

/// Adds `base_offset` to every slot named in the table. Either every entry gets applied or, if
/// any entry is out of range, none does.
#[tracing::instrument(level = "debug", skip(image), err(Debug))]
pub fn apply(image: &mut [u8], load_size: u64, total_size: u64, base_offset: u64) -> Result<(), LoadError> {
    let limit = load_size / 8;
    if let Some((index, entry)) = entries(image, load_size, total_size)
        .enumerate()
        .find(|&(_, entry)| entry as u64 >= limit)
    {
        return Err(LoadError::InvalidRelocation {
            index: index as u64,
            entry,
            limit,
        });
    }

    let (loaded, table) = image[..total_size as usize].split_at_mut(load_size as usize);
    for entry in table.chunks_exact(RELOCATION_ENTRY_SIZE as usize).map(LittleEndian::read_u32) {
        let slot = &mut loaded[entry as usize * 8..entry as usize * 8 + 8];
        let before = LittleEndian::read_u64(slot);
        let after = before.wrapping_add(base_offset);
        trace!(entry, before, after, "relocate");
        LittleEndian::write_u64(slot, after);
    }
    Ok(())
}
