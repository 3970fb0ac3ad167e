//! Extensible Array chunk index (EAHD / EAIB / EASB / EADB).
//!
//! HDF5 indexes chunked datasets with exactly one unlimited dimension
//! through an extensible array. Elements are chunk addresses. The first
//! `idx_blk_elmts` live inline in the index block; the rest live in data
//! blocks grouped into "super blocks" of geometrically growing size:
//!
//! ```text
//! super block u : 2^(u/2) data blocks of data_blk_min_elmts * 2^ceil(u/2) elements
//! ```
//!
//! The index block stores data block addresses for the first few super
//! blocks directly and super block addresses for the rest. Data blocks
//! larger than `2^max_dblk_page_nelmts_bits` elements would be paged. The
//! defaults written here set the page size to the whole element range, so
//! data blocks are never paged and an array grows up to
//! `2^max_nelmts_bits` elements.

use std::collections::{BTreeMap, BTreeSet};

use crate::bytes::{self, Reader};
use crate::error::FormatError;
use crate::file_layout::Patch;

/// Extensible array creation parameters, stored in both the layout
/// message and the array header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EaParams {
    pub max_nelmts_bits: u8,
    pub idx_blk_elmts: u8,
    pub data_blk_min_elmts: u8,
    pub sup_blk_min_data_ptrs: u8,
    pub max_dblk_page_nelmts_bits: u8,
}

impl Default for EaParams {
    /// The HDF5 library defaults, except for the page size, which is large
    /// enough that no data block is ever paged.
    fn default() -> Self {
        Self {
            max_nelmts_bits: 32,
            idx_blk_elmts: 4,
            data_blk_min_elmts: 16,
            sup_blk_min_data_ptrs: 4,
            max_dblk_page_nelmts_bits: 32,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SuperBlockInfo {
    ndblks: u64,
    dblk_nelmts: u64,
    /// First element index, not counting the index block elements.
    start_idx: u64,
}

/// Block geometry derived from [`EaParams`].
#[derive(Debug, Clone)]
pub struct EaGeometry {
    params: EaParams,
    sblk_info: Vec<SuperBlockInfo>,
    iblock_sblks: usize,
    iblock_dblk_addrs: usize,
    iblock_sblk_addrs: usize,
}

fn is_pow2(v: u8) -> bool {
    v != 0 && v.is_power_of_two()
}

impl EaGeometry {
    pub fn new(params: EaParams) -> Result<Self, FormatError> {
        if !is_pow2(params.data_blk_min_elmts)
            || !is_pow2(params.sup_blk_min_data_ptrs)
            || params.idx_blk_elmts == 0
            || params.max_nelmts_bits == 0
            || params.max_nelmts_bits > 64
            || params.max_dblk_page_nelmts_bits >= 64
            || params.max_dblk_page_nelmts_bits > params.max_nelmts_bits
        {
            return Err(FormatError::UnsupportedLayout("extensible array parameters"));
        }
        let log2_dblk_min = params.data_blk_min_elmts.trailing_zeros() as usize;
        let nsblks = 1 + (params.max_nelmts_bits as usize).saturating_sub(log2_dblk_min);

        let mut sblk_info = Vec::with_capacity(nsblks);
        let mut start_idx = 0u64;
        for u in 0..nsblks {
            let ndblks = 1u64 << (u / 2);
            let dblk_nelmts = (params.data_blk_min_elmts as u64) << u.div_ceil(2);
            sblk_info.push(SuperBlockInfo {
                ndblks,
                dblk_nelmts,
                start_idx,
            });
            start_idx = start_idx.saturating_add(ndblks.saturating_mul(dblk_nelmts));
        }

        let iblock_sblks = 2 * params.sup_blk_min_data_ptrs.trailing_zeros() as usize;
        let iblock_dblk_addrs = 2 * (params.sup_blk_min_data_ptrs as usize - 1);
        Ok(Self {
            params,
            iblock_sblk_addrs: nsblks.saturating_sub(iblock_sblks),
            sblk_info,
            iblock_sblks,
            iblock_dblk_addrs,
        })
    }

    pub fn params(&self) -> EaParams {
        self.params
    }

    fn is_paged(&self, sblk: &SuperBlockInfo) -> bool {
        sblk.dblk_nelmts > 1u64 << self.params.max_dblk_page_nelmts_bits
    }

    /// Number of elements the array can address: bounded by
    /// `2^max_nelmts_bits` and by the first paged super block.
    pub fn capacity(&self) -> u64 {
        let mut total = self.params.idx_blk_elmts as u64;
        for sblk in &self.sblk_info {
            if self.is_paged(sblk) {
                break;
            }
            total = total.saturating_add(sblk.ndblks.saturating_mul(sblk.dblk_nelmts));
        }
        match 1u64.checked_shl(u32::from(self.params.max_nelmts_bits)) {
            Some(limit) => total.min(limit),
            None => total,
        }
    }

    /// Bytes used to encode a block offset.
    fn arr_off_size(&self) -> usize {
        (self.params.max_nelmts_bits as usize).div_ceil(8)
    }

    fn header_len(&self, os: usize, ls: usize) -> usize {
        12 + 6 * ls + os + 4
    }

    fn iblock_len(&self, os: usize) -> usize {
        6 + os
            + (self.params.idx_blk_elmts as usize
                + self.iblock_dblk_addrs
                + self.iblock_sblk_addrs)
                * os
            + 4
    }

    fn sblock_len(&self, sblk: &SuperBlockInfo, os: usize) -> usize {
        6 + os + self.arr_off_size() + sblk.ndblks as usize * os + 4
    }

    fn dblock_len(&self, sblk: &SuperBlockInfo, os: usize) -> usize {
        6 + os + self.arr_off_size() + sblk.dblk_nelmts as usize * os + 4
    }
}

impl EaGeometry {
    /// Super block and data block holding spilled element `off` (element
    /// index minus the index block elements).
    fn locate(&self, off: u64) -> Option<(usize, usize)> {
        let u = self.sblk_info.iter().rposition(|s| s.start_idx <= off)?;
        let sblk = &self.sblk_info[u];
        let j = (off - sblk.start_idx) / sblk.dblk_nelmts;
        (j < sblk.ndblks).then_some((u, j as usize))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Stats {
    nsuper_blks: u64,
    super_blk_size: u64,
    ndata_blks: u64,
    data_blk_size: u64,
    max_idx_set: u64,
    nelmts: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Block {
    Index,
    Super(usize),
    Data(usize, usize),
}

fn allocate(eof: &mut u64, len: usize) -> u64 {
    let address = *eof;
    *eof += len as u64;
    address
}

/// Placement of an extensible array's blocks in a file.
///
/// Keeping it around lets new elements be stored by rewriting only the
/// blocks that hold them, instead of re-encoding the whole array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayLayout {
    params: EaParams,
    header: u64,
    index_block: Option<u64>,
    super_blocks: BTreeMap<usize, u64>,
    data_blocks: BTreeMap<(usize, usize), u64>,
    stats: Stats,
}

impl ArrayLayout {
    /// An empty array whose header is allocated at `*eof`.
    pub fn allocate(params: EaParams, eof: &mut u64, offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        let geom = EaGeometry::new(params)?;
        let header = allocate(eof, geom.header_len(offset_size as usize, length_size as usize));
        Ok(Self {
            params,
            header,
            index_block: None,
            super_blocks: BTreeMap::new(),
            data_blocks: BTreeMap::new(),
            stats: Stats::default(),
        })
    }

    /// Address of the array header, as stored in the layout message.
    pub fn address(&self) -> u64 {
        self.header
    }

    /// Record that the `changed` elements now hold the addresses found in
    /// `elements`, allocating missing blocks at `*eof`.
    ///
    /// Returns the writes that bring the file in line: new blocks whole,
    /// existing index and super blocks whole, existing data blocks as the
    /// changed slots plus their checksum, and the header.
    pub fn update(
        &mut self,
        elements: &BTreeMap<u64, u64>,
        changed: impl IntoIterator<Item = u64>,
        eof: &mut u64,
        offset_size: u8,
        length_size: u8,
    ) -> Result<Vec<Patch>, FormatError> {
        let geom = EaGeometry::new(self.params)?;
        let os = offset_size as usize;
        let capacity = geom.capacity();
        let idx_elmts = u64::from(self.params.idx_blk_elmts);

        let mut whole = BTreeSet::new();
        let mut slots: BTreeMap<(usize, usize), Vec<u64>> = BTreeMap::new();
        let mut any = false;
        for index in changed {
            if index >= capacity {
                return Err(FormatError::ChunkIndexFull { capacity });
            }
            any = true;
            self.stats.max_idx_set = self.stats.max_idx_set.max(index + 1);
            if self.index_block.is_none() {
                self.index_block = Some(allocate(eof, geom.iblock_len(os)));
                self.stats.nelmts += idx_elmts;
                whole.insert(Block::Index);
            }
            if index < idx_elmts {
                whole.insert(Block::Index);
                continue;
            }
            let (u, j) = geom
                .locate(index - idx_elmts)
                .ok_or(FormatError::ChunkIndexFull { capacity })?;
            if self.data_blocks.contains_key(&(u, j)) {
                if !whole.contains(&Block::Data(u, j)) {
                    slots.entry((u, j)).or_default().push(index);
                }
                continue;
            }

            let sblk = geom.sblk_info[u];
            let len = geom.dblock_len(&sblk, os);
            self.data_blocks.insert((u, j), allocate(eof, len));
            self.stats.ndata_blks += 1;
            self.stats.data_blk_size += len as u64;
            self.stats.nelmts += sblk.dblk_nelmts;
            whole.insert(Block::Data(u, j));
            if u < geom.iblock_sblks {
                whole.insert(Block::Index);
            } else if self.super_blocks.contains_key(&u) {
                whole.insert(Block::Super(u));
            } else {
                let len = geom.sblock_len(&sblk, os);
                self.super_blocks.insert(u, allocate(eof, len));
                self.stats.nsuper_blks += 1;
                self.stats.super_blk_size += len as u64;
                whole.insert(Block::Super(u));
                whole.insert(Block::Index);
            }
        }
        if !any {
            return Ok(Vec::new());
        }

        let mut patches = Vec::with_capacity(whole.len() + 2 * slots.len() + 1);
        for block in whole {
            let (address, bytes) = match block {
                Block::Index => (self.index_block, self.encode_index_block(&geom, elements, offset_size)),
                Block::Super(u) => (self.super_blocks.get(&u).copied(), self.encode_super_block(&geom, u, offset_size)),
                Block::Data(u, j) => (
                    self.data_blocks.get(&(u, j)).copied(),
                    self.encode_data_block(&geom, u, j, elements, offset_size),
                ),
            };
            if let Some(address) = address {
                patches.push(Patch::new(address, bytes));
            }
        }
        let prefix = (6 + os + geom.arr_off_size()) as u64;
        for ((u, j), indices) in slots {
            let Some(&address) = self.data_blocks.get(&(u, j)) else { continue };
            let block = self.encode_data_block(&geom, u, j, elements, offset_size);
            let sblk = geom.sblk_info[u];
            let first = idx_elmts + sblk.start_idx + j as u64 * sblk.dblk_nelmts;
            for index in indices {
                let at = prefix + (index - first) * os as u64;
                patches.push(Patch::new(address + at, block[at as usize..at as usize + os].to_vec()));
            }
            let checksum_at = block.len() - 4;
            patches.push(Patch::new(address + checksum_at as u64, block[checksum_at..].to_vec()));
        }
        patches.push(Patch::new(self.header, self.encode_header(offset_size, length_size)));
        Ok(patches)
    }

    fn encode_header(&self, offset_size: u8, length_size: u8) -> Vec<u8> {
        let ls = length_size as usize;
        let mut out = Vec::with_capacity(12 + 6 * ls + offset_size as usize + 4);
        out.extend_from_slice(b"EAHD");
        out.push(0); // version
        out.push(0); // client id: unfiltered chunks
        out.push(offset_size);
        out.push(self.params.max_nelmts_bits);
        out.push(self.params.idx_blk_elmts);
        out.push(self.params.data_blk_min_elmts);
        out.push(self.params.sup_blk_min_data_ptrs);
        out.push(self.params.max_dblk_page_nelmts_bits);
        let stats = self.stats;
        for stat in [
            stats.nsuper_blks,
            stats.super_blk_size,
            stats.ndata_blks,
            stats.data_blk_size,
            stats.max_idx_set,
            stats.nelmts,
        ] {
            bytes::put_uint(&mut out, stat, ls);
        }
        bytes::put_address(&mut out, self.index_block, offset_size);
        bytes::seal(&mut out);
        out
    }

    fn encode_index_block(&self, geom: &EaGeometry, elements: &BTreeMap<u64, u64>, offset_size: u8) -> Vec<u8> {
        let os = offset_size as usize;
        let mut out = Vec::with_capacity(geom.iblock_len(os));
        out.extend_from_slice(b"EAIB");
        out.push(0);
        out.push(0);
        bytes::put_uint(&mut out, self.header, os);
        for i in 0..u64::from(self.params.idx_blk_elmts) {
            bytes::put_address(&mut out, elements.get(&i).copied(), offset_size);
        }
        for u in 0..geom.iblock_sblks {
            for j in 0..1usize << (u / 2) {
                bytes::put_address(&mut out, self.data_blocks.get(&(u, j)).copied(), offset_size);
            }
        }
        for u in geom.iblock_sblks..geom.iblock_sblks + geom.iblock_sblk_addrs {
            bytes::put_address(&mut out, self.super_blocks.get(&u).copied(), offset_size);
        }
        bytes::seal(&mut out);
        out
    }

    fn encode_super_block(&self, geom: &EaGeometry, u: usize, offset_size: u8) -> Vec<u8> {
        let os = offset_size as usize;
        let sblk = geom.sblk_info[u];
        let mut out = Vec::with_capacity(geom.sblock_len(&sblk, os));
        out.extend_from_slice(b"EASB");
        out.push(0);
        out.push(0);
        bytes::put_uint(&mut out, self.header, os);
        bytes::put_uint(&mut out, sblk.start_idx, geom.arr_off_size());
        for j in 0..sblk.ndblks as usize {
            bytes::put_address(&mut out, self.data_blocks.get(&(u, j)).copied(), offset_size);
        }
        bytes::seal(&mut out);
        out
    }

    fn encode_data_block(
        &self,
        geom: &EaGeometry,
        u: usize,
        j: usize,
        elements: &BTreeMap<u64, u64>,
        offset_size: u8,
    ) -> Vec<u8> {
        let sblk = geom.sblk_info[u];
        let block_off = sblk.start_idx + j as u64 * sblk.dblk_nelmts;
        let first = u64::from(self.params.idx_blk_elmts) + block_off;
        let mut values = vec![None; sblk.dblk_nelmts as usize];
        for (&index, &address) in elements.range(first..first + sblk.dblk_nelmts) {
            values[(index - first) as usize] = Some(address);
        }
        encode_dblock(geom, &sblk, &values, block_off, self.header, offset_size)
    }
}

/// Encode an extensible array whose header starts at `base_address`.
///
/// `addresses[i]` is the address of chunk `i`; `None` leaves the slot
/// undefined. Returns the header, index block, super blocks and data blocks
/// laid out contiguously.
pub fn build(
    addresses: &[Option<u64>],
    params: EaParams,
    base_address: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<u8>, FormatError> {
    let elements = addresses
        .iter()
        .enumerate()
        .filter_map(|(i, address)| address.map(|a| (i as u64, a)))
        .collect();
    build_with_layout(&elements, params, base_address, offset_size, length_size).map(|(bytes, _)| bytes)
}

/// Like [`build`], taking the defined elements as an index to address map
/// and also returning where each block went.
pub fn build_with_layout(
    elements: &BTreeMap<u64, u64>,
    params: EaParams,
    base_address: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<(Vec<u8>, ArrayLayout), FormatError> {
    let mut eof = base_address;
    let mut layout = ArrayLayout::allocate(params, &mut eof, offset_size, length_size)?;
    let mut patches = layout.update(elements, elements.keys().copied(), &mut eof, offset_size, length_size)?;
    if patches.is_empty() {
        patches.push(Patch::new(base_address, layout.encode_header(offset_size, length_size)));
    }
    let mut out = vec![0u8; (eof - base_address) as usize];
    for patch in patches {
        let start = (patch.offset - base_address) as usize;
        out[start..start + patch.bytes.len()].copy_from_slice(&patch.bytes);
    }
    Ok((out, layout))
}

fn encode_dblock(
    geom: &EaGeometry,
    sblk: &SuperBlockInfo,
    elements: &[Option<u64>],
    block_off: u64,
    header_address: u64,
    offset_size: u8,
) -> Vec<u8> {
    let os = offset_size as usize;
    let mut buf = Vec::with_capacity(geom.dblock_len(sblk, os));
    buf.extend_from_slice(b"EADB");
    buf.push(0);
    buf.push(0);
    bytes::put_uint(&mut buf, header_address, os);
    bytes::put_uint(&mut buf, block_off, geom.arr_off_size());
    for slot in 0..sblk.dblk_nelmts as usize {
        bytes::put_address(&mut buf, elements.get(slot).copied().flatten(), offset_size);
    }
    bytes::seal(&mut buf);
    buf
}

fn block_at<'a>(data: &'a [u8], address: u64, len: usize, signature: &'static str) -> Result<Reader<'a>, FormatError> {
    let start = address as usize;
    let end = start.saturating_add(len);
    if end > data.len() {
        return Err(FormatError::UnexpectedEof {
            expected: end,
            available: data.len(),
        });
    }
    let block = &data[start..end];
    bytes::verify_checksum(block)?;
    let mut r = Reader::new(block);
    r.signature(signature)?;
    let _version = r.u8()?;
    if r.u8()? != 0 {
        return Err(FormatError::UnsupportedLayout("filtered chunk index"));
    }
    Ok(r)
}

/// Decode the chunk addresses of the extensible array at `header_address`.
///
/// The result has one entry per element up to the highest index ever set.
pub fn read(data: &[u8], header_address: u64, offset_size: u8, length_size: u8) -> Result<Vec<Option<u64>>, FormatError> {
    read_with_layout(data, header_address, offset_size, length_size).map(|(elements, _)| elements)
}

/// Like [`read`], also returning where the array's blocks live.
pub fn read_with_layout(
    data: &[u8],
    header_address: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<(Vec<Option<u64>>, ArrayLayout), FormatError> {
    let os = offset_size as usize;
    let ls = length_size as usize;
    let mut r = Reader::at(data, header_address as usize)?;
    r.signature("EAHD")?;
    let _version = r.u8()?;
    if r.u8()? != 0 {
        return Err(FormatError::UnsupportedLayout("filtered chunk index"));
    }
    if r.u8()? as usize != os {
        return Err(FormatError::UnsupportedLayout("extensible array element size"));
    }
    let params = EaParams {
        max_nelmts_bits: r.u8()?,
        idx_blk_elmts: r.u8()?,
        data_blk_min_elmts: r.u8()?,
        sup_blk_min_data_ptrs: r.u8()?,
        max_dblk_page_nelmts_bits: r.u8()?,
    };
    let mut raw = [0u64; 6];
    for stat in &mut raw {
        *stat = r.uint(ls)?;
    }
    let stats = Stats {
        nsuper_blks: raw[0],
        super_blk_size: raw[1],
        ndata_blks: raw[2],
        data_blk_size: raw[3],
        max_idx_set: raw[4],
        nelmts: raw[5],
    };
    let iblock_addr = r.address(offset_size)?;
    r.skip(4)?;
    bytes::verify_checksum(&data[header_address as usize..r.position()])?;

    let geom = EaGeometry::new(params)?;
    if stats.max_idx_set > geom.capacity() {
        return Err(FormatError::UnsupportedLayout("extensible array larger than its capacity"));
    }
    let mut layout = ArrayLayout {
        params,
        header: header_address,
        index_block: iblock_addr,
        super_blocks: BTreeMap::new(),
        data_blocks: BTreeMap::new(),
        stats,
    };
    let Some(iblock_addr) = iblock_addr else {
        return Ok((Vec::new(), layout));
    };
    let max_idx_set = stats.max_idx_set as usize;
    let mut out = vec![None; max_idx_set];

    let mut ib = block_at(data, iblock_addr, geom.iblock_len(os), "EAIB")?;
    ib.skip(os)?;
    let idx_elmts = params.idx_blk_elmts as usize;
    for i in 0..idx_elmts {
        let addr = ib.address(offset_size)?;
        if i < max_idx_set {
            out[i] = addr;
        }
    }
    let direct = (0..geom.iblock_dblk_addrs)
        .map(|_| ib.address(offset_size))
        .collect::<Result<Vec<_>, _>>()?;
    let indirect = (0..geom.iblock_sblk_addrs)
        .map(|_| ib.address(offset_size))
        .collect::<Result<Vec<_>, _>>()?;
    let direct_keys = (0..geom.iblock_sblks).flat_map(|u| (0..1usize << (u / 2)).map(move |j| (u, j)));
    for (key, addr) in direct_keys.zip(&direct) {
        if let Some(addr) = addr {
            layout.data_blocks.insert(key, *addr);
        }
    }
    for (u, addr) in (geom.iblock_sblks..).zip(&indirect) {
        if let Some(addr) = addr {
            layout.super_blocks.insert(u, *addr);
        }
    }

    let spill = max_idx_set.saturating_sub(idx_elmts) as u64;
    let mut direct_slot = 0usize;
    for (u, sblk) in geom.sblk_info.iter().enumerate() {
        if sblk.start_idx >= spill {
            break;
        }
        if geom.is_paged(sblk) {
            return Err(FormatError::UnsupportedLayout("paged extensible array data block"));
        }
        let dblk_addrs: Vec<Option<u64>> = if u < geom.iblock_sblks {
            let slots = &direct[direct_slot..direct_slot + sblk.ndblks as usize];
            direct_slot += sblk.ndblks as usize;
            slots.to_vec()
        } else {
            match indirect[u - geom.iblock_sblks] {
                None => vec![None; sblk.ndblks as usize],
                Some(addr) => {
                    let mut sb = block_at(data, addr, geom.sblock_len(sblk, os), "EASB")?;
                    sb.skip(os + geom.arr_off_size())?;
                    let addrs = (0..sblk.ndblks)
                        .map(|_| sb.address(offset_size))
                        .collect::<Result<Vec<_>, _>>()?;
                    for (j, addr) in addrs.iter().enumerate() {
                        if let Some(addr) = addr {
                            layout.data_blocks.insert((u, j), *addr);
                        }
                    }
                    addrs
                }
            }
        };

        for (j, dblk_addr) in dblk_addrs.into_iter().enumerate() {
            let first = idx_elmts + (sblk.start_idx + j as u64 * sblk.dblk_nelmts) as usize;
            if first >= max_idx_set {
                break;
            }
            let Some(dblk_addr) = dblk_addr else { continue };
            let mut db = block_at(data, dblk_addr, geom.dblock_len(sblk, os), "EADB")?;
            db.skip(os + geom.arr_off_size())?;
            let count = (sblk.dblk_nelmts as usize).min(max_idx_set - first);
            for slot in out.iter_mut().skip(first).take(count) {
                *slot = db.address(offset_size)?;
            }
        }
    }
    Ok((out, layout))
}
