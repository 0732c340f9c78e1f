//! DIE tree walk: one factory per recognized tag, recursive descent for
//! containers
//!
//! The driver dispatches each DIE by tag to a factory that allocates the
//! model node plus its dwarf-side scratch record, then descends into
//! children for the container kinds. Every tag that lands in a CU table
//! gets its dense id recorded back into the scratch so the recode pass can
//! chase raw offsets.

use crate::core::cu::{Cu, DwarfTag};
use crate::core::errors::LoadError;
use crate::core::model::{
    ArrayType, BaseType, Class, ClassMember, Enumerator, FType, Function, InlineExpansion, Label,
    LexBlock, Namespace, NodeId, Parameter, PtrToMember, Tag, TagData, TagKind, Type, Variable,
};
use crate::core::strings::{StringId, StringTable};
use crate::parser::attributes::{
    attr_numeric, attr_offset, attr_string, attr_type, attr_upper_bound, die_offset, entry_ranges,
    has_attr, low_high_pc, Die,
};
use crate::parser::location::variable_location;
use gimli::{AttributeValue, EndianSlice, LittleEndian};
use std::collections::HashSet;
use tracing::warn;

type Node<'abbrev, 'unit, 'tree, 'input> =
    gimli::EntriesTreeNode<'abbrev, 'unit, 'tree, EndianSlice<'input, LittleEndian>>;

const MAX_ARRAY_DIMENSIONS: usize = 64;

/// Recursive-descent parser for one compilation unit's DIE tree.
pub(crate) struct DieParser<'a, 'i> {
    dwarf: &'a gimli::Dwarf<EndianSlice<'i, LittleEndian>>,
    unit: &'a gimli::Unit<EndianSlice<'i, LittleEndian>>,
    cu: &'a mut Cu,
    strings: &'a mut StringTable,
    /// Tags already reported as unsupported; each distinct tag warns once.
    warned: HashSet<gimli::DwTag>,
    /// Most recently resolved decl-file index, so repeated runs of the same
    /// file intern only once.
    last_file: Option<(u64, StringId)>,
}

impl<'a, 'i> DieParser<'a, 'i> {
    pub(crate) fn new(
        dwarf: &'a gimli::Dwarf<EndianSlice<'i, LittleEndian>>,
        unit: &'a gimli::Unit<EndianSlice<'i, LittleEndian>>,
        cu: &'a mut Cu,
        strings: &'a mut StringTable,
    ) -> Self {
        Self {
            dwarf,
            unit,
            cu,
            strings,
            warned: HashSet::new(),
            last_file: None,
        }
    }

    /// Top-of-CU sibling loop: every child of the compile unit DIE is a
    /// top-level tag. An unsupported tag here is a hard error.
    pub(crate) fn process_unit(&mut self, root: Node<'_, '_, '_, 'i>) -> crate::Result<()> {
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            let offset = die_offset(child.entry(), self.unit);
            match self.process_tag(child, true)? {
                Some(nid) => self.table_and_hash(nid),
                None => return Err(LoadError::UnhandledTag { tag, offset }.into()),
            }
        }
        Ok(())
    }

    /// Dispatch one DIE to its factory. Unsupported tags warn once per
    /// distinct tag and yield `None`.
    fn process_tag(
        &mut self,
        node: Node<'_, '_, '_, 'i>,
        top_level: bool,
    ) -> crate::Result<Option<NodeId>> {
        let tag = node.entry().tag();
        let nid = match tag {
            gimli::DW_TAG_array_type => Some(self.create_array(node)?),
            gimli::DW_TAG_base_type => Some(self.create_base_type(node)),
            gimli::DW_TAG_pointer_type => Some(self.create_simple(node, TagKind::Pointer)),
            gimli::DW_TAG_reference_type => Some(self.create_simple(node, TagKind::Reference)),
            gimli::DW_TAG_const_type => Some(self.create_simple(node, TagKind::Const)),
            gimli::DW_TAG_volatile_type => Some(self.create_simple(node, TagKind::Volatile)),
            gimli::DW_TAG_imported_declaration => {
                Some(self.create_simple(node, TagKind::ImportedDeclaration))
            }
            gimli::DW_TAG_imported_module => {
                Some(self.create_simple(node, TagKind::ImportedModule))
            }
            gimli::DW_TAG_ptr_to_member_type => Some(self.create_ptr_to_member(node)),
            gimli::DW_TAG_enumeration_type => Some(self.create_enumeration(node)?),
            gimli::DW_TAG_namespace => Some(self.create_namespace(node)?),
            gimli::DW_TAG_class_type
            | gimli::DW_TAG_interface_type
            | gimli::DW_TAG_structure_type => Some(self.create_class(node)?),
            gimli::DW_TAG_subprogram => Some(self.create_function(node)?),
            gimli::DW_TAG_subroutine_type => Some(self.create_subroutine_type(node)?),
            gimli::DW_TAG_typedef => Some(self.create_typedef(node)),
            gimli::DW_TAG_union_type => Some(self.create_union(node)?),
            gimli::DW_TAG_variable => Some(self.create_variable_tag(node)),
            _ => {
                self.tag_not_handled(node.entry());
                None
            }
        };
        if let Some(nid) = nid {
            self.cu.node_mut(nid).top_level = top_level;
        }
        Ok(nid)
    }

    /// Allocate the node + scratch pair and capture the references every
    /// tag carries: its own DIE offset, `DW_AT_type` (`DW_AT_import` for
    /// imports) and `DW_AT_abstract_origin`.
    fn tag_init(&mut self, entry: &Die, kind: TagKind, data: TagData) -> NodeId {
        let id = die_offset(entry, self.unit);
        let type_at = if matches!(kind, TagKind::ImportedDeclaration | TagKind::ImportedModule) {
            gimli::DW_AT_import
        } else {
            gimli::DW_AT_type
        };
        let type_ref = attr_type(entry, self.unit, type_at);
        let origin = attr_type(entry, self.unit, gimli::DW_AT_abstract_origin);
        let (decl_file, decl_line) = if self.cu.extra_dbg_info {
            self.decl_file_line(entry)
        } else {
            (StringId::EMPTY, 0)
        };

        let nid = self.cu.alloc(Tag {
            kind,
            top_level: false,
            type_id: 0,
            scratch: None,
            data,
        });
        let sid = self.cu.scratch_push(DwarfTag {
            id,
            type_ref,
            origin,
            spec: 0,
            decl_file,
            decl_line,
            small_id: 0,
            node: nid,
        });
        self.cu.node_mut(nid).scratch = Some(sid);
        nid
    }

    fn table_and_hash(&mut self, nid: NodeId) {
        let id = self.cu.table_add(nid);
        self.cu.hash(nid);
        self.cu.set_small_id(nid, id);
    }

    fn tag_not_handled(&mut self, entry: &Die) {
        let tag = entry.tag();
        if self.warned.insert(tag) {
            warn!(
                "{} ({:#x}) at {:#x} not handled",
                tag,
                tag.0,
                die_offset(entry, self.unit)
            );
        }
    }

    fn name_of(&mut self, entry: &Die<'_, '_, 'i>) -> StringId {
        attr_string(entry, self.dwarf, self.unit, gimli::DW_AT_name, self.strings)
    }

    fn set_specification(&mut self, nid: NodeId, entry: &Die) {
        let spec = attr_type(entry, self.unit, gimli::DW_AT_specification);
        if let Some(rec) = self.cu.scratch_record_mut(nid) {
            rec.spec = spec;
        }
    }

    // ------------------------------------------------------------------
    // leaf factories

    fn create_simple(&mut self, node: Node<'_, '_, '_, 'i>, kind: TagKind) -> NodeId {
        let entry = node.entry();
        if entry.has_children() {
            warn!("{} with children!", entry.tag());
        }
        self.tag_init(entry, kind, TagData::Simple)
    }

    fn create_base_type(&mut self, node: Node<'_, '_, '_, 'i>) -> NodeId {
        let entry = node.entry();
        if entry.has_children() {
            warn!("DW_TAG_base_type with children!");
        }
        let name = self.name_of(entry);
        let bit_size = (attr_numeric(entry, gimli::DW_AT_byte_size) * 8) as u16;
        let encoding = match entry.attr_value(gimli::DW_AT_encoding) {
            Ok(Some(AttributeValue::Encoding(e))) => e,
            Ok(Some(AttributeValue::Udata(v))) => gimli::DwAte(v as u8),
            _ => gimli::DwAte(0),
        };
        self.tag_init(
            entry,
            TagKind::Base,
            TagData::Base(BaseType {
                name,
                bit_size,
                is_bool: encoding == gimli::DW_ATE_boolean,
                is_signed: encoding == gimli::DW_ATE_signed,
                is_varargs: false,
            }),
        )
    }

    fn create_ptr_to_member(&mut self, node: Node<'_, '_, '_, 'i>) -> NodeId {
        let entry = node.entry();
        let nid = self.tag_init(
            entry,
            TagKind::PtrToMember,
            TagData::PtrToMember(PtrToMember::default()),
        );
        // the origin slot carries the containing type for this kind
        let containing = attr_type(entry, self.unit, gimli::DW_AT_containing_type);
        if let Some(rec) = self.cu.scratch_record_mut(nid) {
            rec.origin = containing;
        }
        nid
    }

    fn type_payload_init(&mut self, entry: &Die<'_, '_, 'i>) -> Type {
        Type {
            namespace: Namespace {
                name: self.name_of(entry),
                tags: Vec::new(),
                shared_tags: false,
            },
            size: attr_numeric(entry, gimli::DW_AT_byte_size),
            declaration: attr_numeric(entry, gimli::DW_AT_declaration) != 0,
            definition_emitted: false,
            fwd_decl_emitted: false,
            resized: false,
            nr_members: 0,
        }
    }

    fn create_typedef(&mut self, node: Node<'_, '_, '_, 'i>) -> NodeId {
        let entry = node.entry();
        let ty = self.type_payload_init(entry);
        let nid = self.tag_init(entry, TagKind::Typedef, TagData::Type(ty));
        self.set_specification(nid, entry);
        if entry.has_children() {
            let offset = die_offset(entry, self.unit);
            warn!("DW_TAG_typedef {:#x} with children!", offset);
        }
        nid
    }

    fn create_member(&mut self, entry: &Die<'_, '_, 'i>, kind: TagKind) -> NodeId {
        let name = self.name_of(entry);
        let byte_offset = attr_offset(entry, gimli::DW_AT_data_member_location);
        let bitfield_offset = attr_numeric(entry, gimli::DW_AT_bit_offset) as u16;
        let bitfield_size = attr_numeric(entry, gimli::DW_AT_bit_size) as u16;
        self.tag_init(
            entry,
            kind,
            TagData::Member(ClassMember {
                name,
                byte_offset,
                bit_offset: byte_offset
                    .wrapping_mul(8)
                    .wrapping_add(u64::from(bitfield_offset)),
                bitfield_offset,
                bitfield_size,
                byte_size: 0,
                bit_size: 0,
                accessibility: attr_numeric(entry, gimli::DW_AT_accessibility) as u8,
                virtuality: attr_numeric(entry, gimli::DW_AT_virtuality) as u8,
            }),
        )
    }

    fn create_parameter(&mut self, entry: &Die<'_, '_, 'i>) -> NodeId {
        let name = self.name_of(entry);
        self.tag_init(entry, TagKind::Parameter, TagData::Parameter(Parameter { name }))
    }

    fn create_variable(&mut self, entry: &Die<'_, '_, 'i>) -> NodeId {
        let name = self.name_of(entry);
        let external = has_attr(entry, gimli::DW_AT_external);
        let declaration = has_attr(entry, gimli::DW_AT_declaration);
        let mut location = crate::VarLocation::Unknown;
        let mut addr = 0;
        if !declaration && self.cu.has_addr_info {
            (location, addr) = variable_location(entry, self.unit);
        }
        self.tag_init(
            entry,
            TagKind::Variable,
            TagData::Variable(Variable {
                name,
                external,
                declaration,
                location,
                addr,
            }),
        )
    }

    fn create_variable_tag(&mut self, node: Node<'_, '_, '_, 'i>) -> NodeId {
        self.create_variable(node.entry())
    }

    fn create_label(&mut self, entry: &Die<'_, '_, 'i>) -> NodeId {
        let name = self.name_of(entry);
        let addr = if self.cu.has_addr_info {
            low_high_pc(entry).0.unwrap_or(0)
        } else {
            0
        };
        self.tag_init(entry, TagKind::Label, TagData::Label(Label { name, addr }))
    }

    // ------------------------------------------------------------------
    // container factories

    fn create_array(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let data = ArrayType {
                nr_entries: Vec::new(),
                is_vector: has_attr(entry, gimli::DW_AT_GNU_vector),
            };
            self.tag_init(entry, TagKind::Array, TagData::Array(data))
        };

        let mut dims: Vec<u32> = Vec::new();
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_subrange_type {
                self.tag_not_handled(entry);
                continue;
            }
            if dims.len() == MAX_ARRAY_DIMENSIONS {
                warn!("only {} array dimensions are supported!", MAX_ARRAY_DIMENSIONS);
                break;
            }
            dims.push(attr_upper_bound(entry) as u32);
        }

        if let TagData::Array(array) = &mut self.cu.node_mut(nid).data {
            array.nr_entries = dims;
        }
        Ok(nid)
    }

    fn create_enumeration(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let mut ty = self.type_payload_init(entry);
            // enumerations keep their size in bits; no byte size means int
            ty.size = if ty.size == 0 { 32 } else { ty.size * 8 };
            let nid = self.tag_init(entry, TagKind::Enumeration, TagData::Type(ty));
            self.set_specification(nid, entry);
            nid
        };

        let mut children = node.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_enumerator {
                self.tag_not_handled(entry);
                continue;
            }
            let name = self.name_of(entry);
            let value = attr_numeric(entry, gimli::DW_AT_const_value) as i64;
            let enumerator = self.tag_init(
                entry,
                TagKind::Enumerator,
                TagData::Enumerator(Enumerator { name, value }),
            );
            if let Some(ty) = self.cu.node_mut(nid).type_payload_mut() {
                ty.namespace.tags.push(enumerator);
                ty.nr_members += 1;
            }
        }
        Ok(nid)
    }

    fn create_namespace(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let ns = Namespace {
                name: self.name_of(entry),
                tags: Vec::new(),
                shared_tags: false,
            };
            self.tag_init(entry, TagKind::Namespace, TagData::Namespace(ns))
        };

        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            let offset = die_offset(child.entry(), self.unit);
            let Some(child_nid) = self.process_tag(child, false)? else {
                return Err(LoadError::UnhandledTag { tag, offset }.into());
            };
            let id = self.cu.table_add(child_nid);
            self.cu.set_small_id(child_nid, id);
            if let Some(ns) = self.cu.node_mut(nid).namespace_mut() {
                ns.tags.push(child_nid);
            }
            self.cu.hash(child_nid);
        }
        Ok(nid)
    }

    fn create_class(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let kind = if node.entry().tag() == gimli::DW_TAG_structure_type {
            TagKind::Struct
        } else {
            TagKind::Class
        };
        let nid = {
            let entry = node.entry();
            let ty = self.type_payload_init(entry);
            let nid = self.tag_init(
                entry,
                kind,
                TagData::Class(Class {
                    ty,
                    ..Default::default()
                }),
            );
            self.set_specification(nid, entry);
            nid
        };
        self.process_class_children(node, nid)?;
        Ok(nid)
    }

    fn create_union(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let ty = self.type_payload_init(entry);
            let nid = self.tag_init(entry, TagKind::Union, TagData::Type(ty));
            self.set_specification(nid, entry);
            nid
        };
        self.process_class_children(node, nid)?;
        Ok(nid)
    }

    /// Children of a class, struct or union. Members and inheritance tags
    /// go on the member list (and, for C++ units, into the tags table so
    /// offset references to them resolve); everything else is a regular
    /// child tag.
    fn process_class_children(
        &mut self,
        node: Node<'_, '_, '_, 'i>,
        class_nid: NodeId,
    ) -> crate::Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            match tag {
                gimli::DW_TAG_template_type_parameter
                | gimli::DW_TAG_template_value_parameter
                | gimli::DW_TAG_GNU_template_template_param
                | gimli::DW_TAG_GNU_template_parameter_pack => {
                    self.tag_not_handled(child.entry());
                }
                gimli::DW_TAG_inheritance | gimli::DW_TAG_member => {
                    let kind = if tag == gimli::DW_TAG_member {
                        TagKind::Member
                    } else {
                        TagKind::Inheritance
                    };
                    let member = self.create_member(child.entry(), kind);
                    if self.cu.is_cpp() {
                        let id = self.cu.table_add(member);
                        self.cu.set_small_id(member, id);
                    }
                    if let Some(ty) = self.cu.node_mut(class_nid).type_payload_mut() {
                        ty.namespace.tags.push(member);
                        ty.nr_members += 1;
                    }
                    self.cu.hash(member);
                }
                _ => {
                    let offset = die_offset(child.entry(), self.unit);
                    let Some(child_nid) = self.process_tag(child, false)? else {
                        return Err(LoadError::UnhandledTag { tag, offset }.into());
                    };
                    let id = self.cu.table_add(child_nid);
                    self.cu.set_small_id(child_nid, id);
                    if let Some(ns) = self.cu.node_mut(class_nid).namespace_mut() {
                        ns.tags.push(child_nid);
                    }
                    self.cu.hash(child_nid);

                    let is_virtual = self
                        .cu
                        .node(child_nid)
                        .function()
                        .is_some_and(|f| f.vtable_entry.is_some());
                    if is_virtual {
                        if let TagData::Class(class) = &mut self.cu.node_mut(class_nid).data {
                            class.vtable.push(child_nid);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn lexblock_init(&mut self, entry: &Die) -> LexBlock {
        let mut block = LexBlock::default();
        if self.cu.has_addr_info {
            let (low, high) = low_high_pc(entry);
            block.addr = low.unwrap_or(0);
            if block.addr != 0 {
                block.size = high.map(|h| h - block.addr).unwrap_or(0);
            }
        }
        block
    }

    fn create_function(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let name = self.name_of(entry);
            let mut linkage_name = attr_string(
                entry,
                self.dwarf,
                self.unit,
                gimli::DW_AT_linkage_name,
                self.strings,
            );
            if linkage_name.is_empty() {
                linkage_name = attr_string(
                    entry,
                    self.dwarf,
                    self.unit,
                    gimli::DW_AT_MIPS_linkage_name,
                    self.strings,
                );
            }
            let function = Function {
                proto: FType::default(),
                block: self.lexblock_init(entry),
                name,
                linkage_name,
                inlined: attr_numeric(entry, gimli::DW_AT_inline) as u8,
                external: has_attr(entry, gimli::DW_AT_external),
                abstract_origin: has_attr(entry, gimli::DW_AT_abstract_origin),
                accessibility: attr_numeric(entry, gimli::DW_AT_accessibility) as u8,
                virtuality: attr_numeric(entry, gimli::DW_AT_virtuality) as u8,
                vtable_entry: has_attr(entry, gimli::DW_AT_vtable_elem_location)
                    .then(|| attr_offset(entry, gimli::DW_AT_vtable_elem_location)),
            };
            let nid = self.tag_init(entry, TagKind::Subprogram, TagData::Function(Box::new(function)));
            self.set_specification(nid, entry);
            nid
        };
        self.process_function_children(node, Some(nid), Some(nid))?;
        Ok(nid)
    }

    fn create_subroutine_type(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            self.tag_init(entry, TagKind::SubroutineType, TagData::Ftype(FType::default()))
        };

        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            match tag {
                gimli::DW_TAG_formal_parameter => {
                    let parm = self.create_parameter(child.entry());
                    if let Some(ftype) = self.cu.node_mut(nid).ftype_mut() {
                        ftype.parms.push(parm);
                    }
                    self.table_and_hash(parm);
                }
                gimli::DW_TAG_unspecified_parameters => {
                    if let Some(ftype) = self.cu.node_mut(nid).ftype_mut() {
                        ftype.unspec_parms = true;
                    }
                }
                _ => {
                    let offset = die_offset(child.entry(), self.unit);
                    let Some(child_nid) = self.process_tag(child, false)? else {
                        return Err(LoadError::UnhandledTag { tag, offset }.into());
                    };
                    self.table_and_hash(child_nid);
                }
            }
        }
        Ok(nid)
    }

    fn create_lexblock(
        &mut self,
        node: Node<'_, '_, '_, 'i>,
        father: Option<NodeId>,
    ) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let block = self.lexblock_init(entry);
            self.tag_init(entry, TagKind::LexBlock, TagData::LexBlock(block))
        };
        self.process_function_children(node, None, Some(nid))?;
        if let Some(father) = father {
            if let Some(block) = self.cu.node_mut(father).lexblock_mut() {
                block.tags.push(nid);
                block.nr_lexblocks += 1;
            }
        }
        Ok(nid)
    }

    /// Contiguous extent from lowpc/highpc, or the summed ranges when the
    /// instance is non-contiguous. An expansion with neither is tolerated
    /// with size 0.
    fn inline_extent(&self, entry: &Die<'_, '_, 'i>) -> (u64, u64, u64) {
        if !self.cu.has_addr_info {
            return (0, 0, 0);
        }
        let (low, high) = low_high_pc(entry);
        let mut addr = low.unwrap_or(0);
        let mut high_pc = high.unwrap_or(addr);
        let mut size = high_pc.saturating_sub(addr);
        if size == 0 {
            for (begin, end) in entry_ranges(entry, self.unit, self.dwarf) {
                size += end - begin;
                if addr == 0 {
                    addr = begin;
                }
                high_pc = end;
            }
        }
        (addr, high_pc, size)
    }

    fn create_inline_expansion(
        &mut self,
        node: Node<'_, '_, '_, 'i>,
        block: Option<NodeId>,
    ) -> crate::Result<NodeId> {
        let nid = {
            let entry = node.entry();
            let (addr, high_pc, size) = self.inline_extent(entry);
            let nid = self.tag_init(
                entry,
                TagKind::InlineExpansion,
                TagData::InlineExpansion(InlineExpansion { addr, high_pc, size }),
            );
            // the type slot of an inline expansion holds its abstract origin,
            // and the call site takes the place of the declaration position
            let origin = attr_type(entry, self.unit, gimli::DW_AT_abstract_origin);
            let call_line = attr_numeric(entry, gimli::DW_AT_call_line) as u32;
            let call_file = match entry.attr_value(gimli::DW_AT_call_file) {
                Ok(Some(AttributeValue::FileIndex(index)))
                | Ok(Some(AttributeValue::Udata(index))) => self.file_string(index),
                _ => StringId::EMPTY,
            };
            if let Some(rec) = self.cu.scratch_record_mut(nid) {
                rec.type_ref = origin;
                rec.decl_file = call_file;
                rec.decl_line = call_line;
            }
            nid
        };
        self.process_inline_children(node)?;
        if let Some(block_nid) = block {
            let size = match &self.cu.node(nid).data {
                TagData::InlineExpansion(exp) => exp.size,
                _ => 0,
            };
            if let Some(block) = self.cu.node_mut(block_nid).lexblock_mut() {
                block.tags.push(nid);
                block.nr_inline_expansions += 1;
                block.size_inline_expansions += size;
            }
        }
        Ok(nid)
    }

    /// Children of subprograms and lexical blocks. `ftype` is the tag whose
    /// parameter list formal parameters join; inside an inline-expansion
    /// context there is none and parameters stay on the surrounding block,
    /// where abstract-origin references can still find them.
    fn process_function_children(
        &mut self,
        node: Node<'_, '_, '_, 'i>,
        ftype: Option<NodeId>,
        block: Option<NodeId>,
    ) -> crate::Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            match tag {
                gimli::DW_TAG_template_type_parameter | gimli::DW_TAG_template_value_parameter => {
                    self.tag_not_handled(child.entry());
                }
                gimli::DW_TAG_formal_parameter => {
                    let parm = self.create_parameter(child.entry());
                    match ftype {
                        Some(ftype_nid) => {
                            if let Some(ftype) = self.cu.node_mut(ftype_nid).ftype_mut() {
                                ftype.parms.push(parm);
                            }
                        }
                        None => {
                            if let Some(block_nid) = block {
                                if let Some(block) = self.cu.node_mut(block_nid).lexblock_mut() {
                                    block.tags.push(parm);
                                }
                            }
                        }
                    }
                    self.table_and_hash(parm);
                }
                gimli::DW_TAG_variable => {
                    let var = self.create_variable(child.entry());
                    if let Some(block_nid) = block {
                        if let Some(block) = self.cu.node_mut(block_nid).lexblock_mut() {
                            block.tags.push(var);
                            block.nr_variables += 1;
                        }
                    }
                    self.table_and_hash(var);
                }
                gimli::DW_TAG_unspecified_parameters => {
                    if let Some(ftype_nid) = ftype {
                        if let Some(ftype) = self.cu.node_mut(ftype_nid).ftype_mut() {
                            ftype.unspec_parms = true;
                        }
                    }
                }
                gimli::DW_TAG_label => {
                    let label = self.create_label(child.entry());
                    if let Some(block_nid) = block {
                        if let Some(block) = self.cu.node_mut(block_nid).lexblock_mut() {
                            block.tags.push(label);
                            block.nr_labels += 1;
                        }
                    }
                    self.table_and_hash(label);
                }
                gimli::DW_TAG_inlined_subroutine => {
                    let exp = self.create_inline_expansion(child, block)?;
                    self.table_and_hash(exp);
                }
                gimli::DW_TAG_lexical_block => {
                    self.create_lexblock(child, block)?;
                }
                _ => {
                    let offset = die_offset(child.entry(), self.unit);
                    let Some(child_nid) = self.process_tag(child, false)? else {
                        return Err(LoadError::UnhandledTag { tag, offset }.into());
                    };
                    self.table_and_hash(child_nid);
                }
            }
        }
        Ok(())
    }

    /// Children of an inline expansion: free-floating tags with no
    /// ftype/block context.
    fn process_inline_children(&mut self, node: Node<'_, '_, '_, 'i>) -> crate::Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let tag = child.entry().tag();
            match tag {
                gimli::DW_TAG_lexical_block => {
                    self.create_lexblock(child, None)?;
                }
                gimli::DW_TAG_formal_parameter => {
                    // the abstract origin's parameters already model these
                }
                gimli::DW_TAG_inlined_subroutine => {
                    let exp = self.create_inline_expansion(child, None)?;
                    self.table_and_hash(exp);
                }
                _ => {
                    let offset = die_offset(child.entry(), self.unit);
                    let Some(child_nid) = self.process_tag(child, false)? else {
                        return Err(LoadError::UnhandledTag { tag, offset }.into());
                    };
                    self.table_and_hash(child_nid);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // decl file/line capture

    fn decl_file_line(&mut self, entry: &Die) -> (StringId, u32) {
        let line = attr_numeric(entry, gimli::DW_AT_decl_line) as u32;
        let file = match entry.attr_value(gimli::DW_AT_decl_file) {
            Ok(Some(AttributeValue::FileIndex(index))) | Ok(Some(AttributeValue::Udata(index))) => {
                self.file_string(index)
            }
            _ => StringId::EMPTY,
        };
        (file, line)
    }

    fn file_string(&mut self, index: u64) -> StringId {
        if let Some((last, id)) = self.last_file {
            if last == index {
                return id;
            }
        }
        let id = self.resolve_file(index).unwrap_or(StringId::EMPTY);
        self.last_file = Some((index, id));
        id
    }

    fn resolve_file(&mut self, index: u64) -> Option<StringId> {
        let program = self.unit.line_program.as_ref()?;
        let header = program.header();
        let file = header.file(index)?;
        let name = self.dwarf.attr_string(self.unit, file.path_name()).ok()?;
        let name = name.to_string_lossy();
        if name.starts_with('/') {
            return Some(self.strings.add(&name));
        }
        let dir = file
            .directory(header)
            .and_then(|dir| self.dwarf.attr_string(self.unit, dir).ok());
        let full = match dir {
            Some(dir) => {
                let dir = dir.to_string_lossy();
                if dir.is_empty() {
                    name.into_owned()
                } else {
                    format!("{}/{}", dir, name)
                }
            }
            None => name.into_owned(),
        };
        Some(self.strings.add(&full))
    }
}
