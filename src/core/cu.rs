//! Per-CU node tables and dwarf-side scratch records
//!
//! A [`Cu`] owns every node parsed from one compilation unit: the node arena
//! plus the three dense id tables the rest of the model indexes into. The
//! parse-time scratch (raw DIE offsets, hash indices) lives in a separate
//! [`DwarfCu`] so it can be dropped wholesale once recoding is done.

use crate::core::model::{NodeId, ScratchId, Tag, TagData, TagKind};
use crate::core::strings::{StringId, StringTable};

const HASHTAGS_BITS: u32 = 8;
const HASHTAGS_SIZE: usize = 1 << HASHTAGS_BITS;

/// Multiplicative hash over a DIE offset, reduced to a bucket index.
fn hashtags_bucket(id: u64) -> usize {
    (id.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> (64 - HASHTAGS_BITS)) as usize
}

/// Chained hash table keyed by raw DIE offset.
#[derive(Debug)]
pub(crate) struct HashTags {
    buckets: Vec<Vec<(u64, ScratchId)>>,
}

impl HashTags {
    fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); HASHTAGS_SIZE],
        }
    }

    fn insert(&mut self, id: u64, record: ScratchId) {
        self.buckets[hashtags_bucket(id)].push((id, record));
    }

    /// Offset 0 is never a valid DIE and always misses.
    fn find(&self, id: u64) -> Option<ScratchId> {
        if id == 0 {
            return None;
        }
        self.buckets[hashtags_bucket(id)]
            .iter()
            .find(|(key, _)| *key == id)
            .map(|(_, record)| *record)
    }
}

/// Parse-time scratch attached to a model node.
///
/// All reference fields hold raw DIE offsets; 0 means absent. `origin` is
/// the abstract origin for most kinds and the containing type for
/// pointer-to-member tags.
#[derive(Clone, Debug)]
pub(crate) struct DwarfTag {
    /// This node's own DIE offset.
    pub id: u64,
    /// `DW_AT_type` (or `DW_AT_import` for imported modules/declarations).
    pub type_ref: u64,
    pub origin: u64,
    /// `DW_AT_specification`, for the kinds that carry one.
    pub spec: u64,
    pub decl_file: StringId,
    pub decl_line: u32,
    /// Dense index assigned when the node entered its table.
    pub small_id: u32,
    pub node: NodeId,
}

/// Dwarf-side scratch for one CU: the side-records plus the two hash
/// indices recode uses to chase raw offsets.
#[derive(Debug)]
pub(crate) struct DwarfCu {
    records: Vec<DwarfTag>,
    hash_tags: HashTags,
    hash_types: HashTags,
}

impl DwarfCu {
    pub(crate) fn new() -> Self {
        Self {
            records: Vec::new(),
            hash_tags: HashTags::new(),
            hash_types: HashTags::new(),
        }
    }

    pub(crate) fn push(&mut self, record: DwarfTag) -> ScratchId {
        let id = ScratchId(self.records.len() as u32);
        self.records.push(record);
        id
    }

    pub(crate) fn record(&self, id: ScratchId) -> &DwarfTag {
        &self.records[id.0 as usize]
    }

    pub(crate) fn record_mut(&mut self, id: ScratchId) -> &mut DwarfTag {
        &mut self.records[id.0 as usize]
    }

    pub(crate) fn find_tag(&self, id: u64) -> Option<ScratchId> {
        self.hash_tags.find(id)
    }

    pub(crate) fn find_type(&self, id: u64) -> Option<ScratchId> {
        self.hash_types.find(id)
    }
}

/// Which table a tag lives in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Table {
    Types,
    Tags,
    Functions,
}

impl Table {
    pub fn for_kind(kind: TagKind) -> Table {
        if kind == TagKind::Subprogram {
            Table::Functions
        } else if kind.is_type() {
            Table::Types
        } else {
            Table::Tags
        }
    }
}

/// One loaded compilation unit.
pub struct Cu {
    pub name: String,
    pub filename: String,
    pub build_id: Vec<u8>,
    pub addr_size: u8,
    pub language: gimli::DwLang,
    /// Keep per-tag DIE origin information alive after loading.
    pub extra_dbg_info: bool,
    /// Capture variable/label/block addresses.
    pub has_addr_info: bool,
    nodes: Vec<Tag>,
    /// Type-kind tags; index 0 is reserved for void and holds no node.
    pub types_table: Vec<Option<NodeId>>,
    /// Non-type tags: variables, parameters, members (C++), labels, ...
    pub tags_table: Vec<Option<NodeId>>,
    /// Subprograms.
    pub functions_table: Vec<Option<NodeId>>,
    pub(crate) scratch: Option<Box<DwarfCu>>,
}

impl Cu {
    pub(crate) fn new(
        name: String,
        filename: String,
        build_id: Vec<u8>,
        addr_size: u8,
        language: gimli::DwLang,
        extra_dbg_info: bool,
        has_addr_info: bool,
    ) -> Self {
        Self {
            name,
            filename,
            build_id,
            addr_size,
            language,
            extra_dbg_info,
            has_addr_info,
            nodes: Vec::new(),
            types_table: vec![None],
            tags_table: Vec::new(),
            functions_table: Vec::new(),
            scratch: Some(Box::new(DwarfCu::new())),
        }
    }

    pub fn is_cpp(&self) -> bool {
        matches!(
            self.language,
            gimli::DW_LANG_C_plus_plus
                | gimli::DW_LANG_C_plus_plus_03
                | gimli::DW_LANG_C_plus_plus_11
                | gimli::DW_LANG_C_plus_plus_14
        )
    }

    pub fn node(&self, id: NodeId) -> &Tag {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Tag {
        &mut self.nodes[id.index()]
    }

    pub fn nr_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn alloc(&mut self, tag: Tag) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(tag);
        id
    }

    /// Append a tag to the table its kind selects and return the dense id.
    pub(crate) fn table_add(&mut self, nid: NodeId) -> u32 {
        let table = match Table::for_kind(self.nodes[nid.index()].kind) {
            Table::Types => &mut self.types_table,
            Table::Tags => &mut self.tags_table,
            Table::Functions => &mut self.functions_table,
        };
        table.push(Some(nid));
        (table.len() - 1) as u32
    }

    /// Record the dense id in the node's scratch record.
    pub(crate) fn set_small_id(&mut self, nid: NodeId, small_id: u32) {
        if let (Some(sid), Some(dcu)) = (self.nodes[nid.index()].scratch, self.scratch.as_mut()) {
            dcu.record_mut(sid).small_id = small_id;
        }
    }

    /// Insert the tag's scratch record into the per-CU hash index.
    ///
    /// Type kinds go to the type hash; everything else, including
    /// namespaces (so imported-module references can resolve), to the tag
    /// hash.
    pub(crate) fn hash(&mut self, nid: NodeId) {
        let tag = &self.nodes[nid.index()];
        let Some(sid) = tag.scratch else { return };
        let is_type_hash = tag.kind.is_type() && tag.kind != TagKind::Namespace;
        let Some(dcu) = self.scratch.as_mut() else {
            return;
        };
        let id = dcu.record(sid).id;
        if is_type_hash {
            dcu.hash_types.insert(id, sid);
        } else {
            dcu.hash_tags.insert(id, sid);
        }
    }

    /// Mutable access to a node's scratch record, while the scratch is
    /// alive.
    pub(crate) fn scratch_record_mut(&mut self, nid: NodeId) -> Option<&mut DwarfTag> {
        let sid = self.nodes[nid.index()].scratch?;
        Some(self.scratch.as_mut()?.record_mut(sid))
    }

    pub(crate) fn scratch_push(&mut self, record: DwarfTag) -> ScratchId {
        self.scratch
            .as_mut()
            .expect("scratch dropped before parse finished")
            .push(record)
    }

    pub(crate) fn take_scratch(&mut self) -> Option<Box<DwarfCu>> {
        self.scratch.take()
    }

    pub(crate) fn put_scratch(&mut self, dcu: Box<DwarfCu>) {
        self.scratch = Some(dcu);
    }

    /// Drop the dwarf-side scratch; origin accessors return nothing after
    /// this.
    pub(crate) fn drop_scratch(&mut self) {
        self.scratch = None;
    }

    /// Look up a dense type id. Id 0 is void and resolves to no node.
    pub fn type_tag(&self, id: u32) -> Option<&Tag> {
        self.types_table
            .get(id as usize)
            .copied()
            .flatten()
            .map(|nid| self.node(nid))
    }

    pub(crate) fn type_node(&self, id: u32) -> Option<NodeId> {
        self.types_table.get(id as usize).copied().flatten()
    }

    pub fn table_tag(&self, id: u32) -> Option<&Tag> {
        self.tags_table
            .get(id as usize)
            .copied()
            .flatten()
            .map(|nid| self.node(nid))
    }

    pub fn function_tag(&self, id: u32) -> Option<&Tag> {
        self.functions_table
            .get(id as usize)
            .copied()
            .flatten()
            .map(|nid| self.node(nid))
    }

    /// Byte size of the type a dense id names; void and unknown kinds
    /// size as 0.
    pub fn type_size(&self, type_id: u32) -> u64 {
        let Some(nid) = self.type_node(type_id) else {
            return 0;
        };
        self.node_size(nid)
    }

    fn node_size(&self, nid: NodeId) -> u64 {
        let tag = self.node(nid);
        match tag.kind {
            TagKind::Pointer | TagKind::Reference | TagKind::PtrToMember => {
                u64::from(self.addr_size)
            }
            TagKind::Base => tag.base_type().map_or(0, |b| u64::from(b.bit_size) / 8),
            // enumeration sizes are kept in bits
            TagKind::Enumeration => tag.type_payload().map_or(0, |t| t.size / 8),
            TagKind::Struct | TagKind::Class | TagKind::Union => {
                tag.type_payload().map_or(0, |t| t.size)
            }
            TagKind::Typedef | TagKind::Const | TagKind::Volatile => self.type_size(tag.type_id),
            TagKind::Array => {
                let element = self.type_size(tag.type_id);
                tag.array().map_or(element, |a| {
                    a.nr_entries
                        .iter()
                        .map(|&n| u64::from(n))
                        .product::<u64>()
                        .wrapping_mul(element)
                })
            }
            _ => 0,
        }
    }

    /// Linear search for a base type with this interned name and bit size.
    /// Bitfield synthesis depends on this going through the dense table so
    /// synthetic types dedup by `(name, bit_size)`.
    pub fn find_base_type_by_name_and_size(&self, name: StringId, bit_size: u16) -> Option<u32> {
        self.types_table.iter().enumerate().find_map(|(i, entry)| {
            let tag = self.node((*entry)?);
            match &tag.data {
                TagData::Base(bt) if bt.name == name && bt.bit_size == bit_size => Some(i as u32),
                _ => None,
            }
        })
    }

    /// Linear search for an enumeration with this interned name and bit
    /// size.
    pub fn find_enumeration_by_name_and_size(&self, name: StringId, bit_size: u16) -> Option<u32> {
        self.types_table.iter().enumerate().find_map(|(i, entry)| {
            let tag = self.node((*entry)?);
            if tag.kind != TagKind::Enumeration {
                return None;
            }
            match tag.type_payload() {
                Some(t) if t.namespace.name == name && t.size == u64::from(bit_size) => {
                    Some(i as u32)
                }
                _ => None,
            }
        })
    }

    fn record_of(&self, tag: &Tag) -> Option<&DwarfTag> {
        let sid = tag.scratch?;
        Some(self.scratch.as_ref()?.record(sid))
    }

    /// Original DIE offset of a tag, when `extra_dbg_info` kept the scratch
    /// alive.
    pub fn orig_id(&self, tag: &Tag) -> Option<u64> {
        if !self.extra_dbg_info {
            return None;
        }
        self.record_of(tag).map(|r| r.id)
    }

    /// Raw DWARF offset the tag's type reference had before recoding.
    pub fn orig_type(&self, tag: &Tag) -> Option<u64> {
        if !self.extra_dbg_info {
            return None;
        }
        self.record_of(tag).map(|r| r.type_ref)
    }

    pub fn decl_file(&self, tag: &Tag) -> Option<StringId> {
        if !self.extra_dbg_info {
            return None;
        }
        self.record_of(tag).map(|r| r.decl_file)
    }

    pub fn decl_line(&self, tag: &Tag) -> Option<u32> {
        if !self.extra_dbg_info {
            return None;
        }
        self.record_of(tag).map(|r| r.decl_line)
    }

    /// Dense table index of a tag, while the scratch is alive.
    pub fn small_id(&self, tag: &Tag) -> Option<u32> {
        if !self.extra_dbg_info {
            return None;
        }
        self.record_of(tag).map(|r| r.small_id)
    }
}

/// The collection of loaded CUs plus the string table their names index.
pub struct Cus {
    units: Vec<Box<Cu>>,
    strings: StringTable,
}

impl Cus {
    pub fn new() -> Self {
        Self {
            units: Vec::new(),
            strings: StringTable::new(),
        }
    }

    pub fn add(&mut self, cu: Box<Cu>) {
        self.units.push(cu);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cu> {
        self.units.iter().map(Box::as_ref)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    pub fn strings_mut(&mut self) -> &mut StringTable {
        &mut self.strings
    }
}

impl Default for Cus {
    fn default() -> Self {
        Self::new()
    }
}
