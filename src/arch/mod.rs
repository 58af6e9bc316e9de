mod addr;
mod bits;
mod extent;

pub use addr::{
    offset, splice, Address, AddressSlice, BlockNumber, BlockOffset, OffsetOverflow, PageNumber,
    PageOffset,
};
pub use bits::{bitmask, lg2, splice_bits};
pub use extent::{DynamicExtent, Extent, SizedExtent, StaticExtent};

/// log2 of the cache line size in bytes.
pub const LOG2_BLOCK_SIZE: u32 = 6;
/// log2 of the page size in bytes.
pub const LOG2_PAGE_SIZE: u32 = 12;
pub const BLOCK_SIZE: u64 = 1 << LOG2_BLOCK_SIZE;
pub const PAGE_SIZE: u64 = 1 << LOG2_PAGE_SIZE;
/// Size of one page-table entry in bytes.
pub const PTE_BYTES: u64 = 8;
