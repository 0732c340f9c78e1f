//! In-memory model of one compilation unit's declarations
//!
//! Every recognized DIE becomes a [`Tag`] in the CU's node arena. Tags refer
//! to each other through dense per-table indices (`type_id`, child id lists),
//! never through pointers, so the whole graph is freed by dropping the CU and
//! cycles (class -> method -> parameter -> class) cost nothing to model.

use crate::core::strings::StringId;

/// Index of a node in its CU's arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a scratch record in the CU's dwarf-side table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct ScratchId(pub(crate) u32);

/// The closed set of DIE kinds the loader models.
///
/// `DW_TAG_structure_type` maps to `Struct`, `DW_TAG_class_type` and
/// `DW_TAG_interface_type` to `Class`; `Member` covers both data members and
/// `DW_TAG_inheritance` (the latter gets the `Inheritance` kind but the same
/// payload).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TagKind {
    Pointer,
    Reference,
    Const,
    Volatile,
    ImportedDeclaration,
    ImportedModule,
    PtrToMember,
    Base,
    Array,
    Enumerator,
    Enumeration,
    Struct,
    Class,
    Union,
    Namespace,
    Typedef,
    Member,
    Inheritance,
    Parameter,
    Variable,
    Label,
    SubroutineType,
    Subprogram,
    LexBlock,
    InlineExpansion,
}

impl TagKind {
    /// Kinds stored in the CU's `types_table`, addressable from `type_id`
    /// fields.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            TagKind::Pointer
                | TagKind::Reference
                | TagKind::Const
                | TagKind::Volatile
                | TagKind::PtrToMember
                | TagKind::Base
                | TagKind::Array
                | TagKind::Enumeration
                | TagKind::Struct
                | TagKind::Class
                | TagKind::Union
                | TagKind::Namespace
                | TagKind::Typedef
                | TagKind::SubroutineType
        )
    }

    /// Kinds whose payload carries a [`Type`] and a specification slot.
    pub fn has_specification(self) -> bool {
        matches!(
            self,
            TagKind::Struct
                | TagKind::Class
                | TagKind::Union
                | TagKind::Typedef
                | TagKind::Enumeration
        )
    }

    /// Kinds that embed a [`Namespace`] with an ordered child list.
    /// Typedefs carry a `Type` payload but no children, so they are not here.
    pub fn has_namespace(self) -> bool {
        matches!(
            self,
            TagKind::Struct
                | TagKind::Class
                | TagKind::Union
                | TagKind::Namespace
                | TagKind::Enumeration
        )
    }
}

/// Where a variable's value lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum VarLocation {
    #[default]
    Unknown,
    /// No location expression at all: optimized away.
    Optimized,
    /// `DW_OP_addr`: at a fixed address.
    Global,
    /// In a register.
    Register,
    /// Frame-relative.
    Local,
}

#[derive(Clone, Debug, Default)]
pub struct BaseType {
    pub name: StringId,
    pub bit_size: u16,
    pub is_bool: bool,
    pub is_signed: bool,
    pub is_varargs: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ArrayType {
    /// Entry count per dimension, in declaration order (upper bound + 1).
    pub nr_entries: Vec<u32>,
    pub is_vector: bool,
}

impl ArrayType {
    pub fn dimensions(&self) -> usize {
        self.nr_entries.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Enumerator {
    pub name: StringId,
    pub value: i64,
}

/// Common part of every named container: namespaces proper, but also
/// classes, unions, enumerations and typedefs.
#[derive(Clone, Debug, Default)]
pub struct Namespace {
    pub name: StringId,
    /// Ordered child tags, in DIE declaration order.
    pub tags: Vec<NodeId>,
    /// The child list is borrowed from another tag (synthetic bitfield enums
    /// share the original's enumerators).
    pub shared_tags: bool,
}

/// Payload of union/typedef/enumeration tags, and the common part of
/// struct/class tags.
#[derive(Clone, Debug, Default)]
pub struct Type {
    pub namespace: Namespace,
    /// Byte size for structs and unions; BIT size for enumerations.
    pub size: u64,
    /// Non-defining declaration.
    pub declaration: bool,
    pub definition_emitted: bool,
    pub fwd_decl_emitted: bool,
    pub resized: bool,
    pub nr_members: u16,
}

/// Struct/class payload: a [`Type`] plus the layout bookkeeping only
/// classes need.
#[derive(Clone, Debug, Default)]
pub struct Class {
    pub ty: Type,
    /// Virtual member functions, in vtable-entry order of discovery.
    pub vtable: Vec<NodeId>,
    pub nr_holes: u16,
    pub nr_bit_holes: u16,
    pub padding: u16,
    pub bit_padding: u16,
}

#[derive(Clone, Debug, Default)]
pub struct PtrToMember {
    /// Dense types_table id of the containing class, valid after recode.
    pub containing_type: u32,
}

#[derive(Clone, Debug, Default)]
pub struct ClassMember {
    pub name: StringId,
    /// Offset of the member storage unit within the class, in bytes.
    pub byte_offset: u64,
    /// `byte_offset * 8 + bitfield_offset`.
    pub bit_offset: u64,
    pub bitfield_offset: u16,
    pub bitfield_size: u16,
    /// Cached by the size pass: storage unit size in bytes.
    pub byte_size: u64,
    /// Cached by the size pass: effective size in bits.
    pub bit_size: u64,
    pub accessibility: u8,
    pub virtuality: u8,
}

#[derive(Clone, Debug, Default)]
pub struct Parameter {
    pub name: StringId,
}

#[derive(Clone, Debug, Default)]
pub struct Variable {
    pub name: StringId,
    /// Visible outside its compilation unit.
    pub external: bool,
    /// Non-defining declaration of an object.
    pub declaration: bool,
    pub location: VarLocation,
    /// Address when `location` is `Global`.
    pub addr: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Label {
    pub name: StringId,
    pub addr: u64,
}

/// Function-type view shared by subprograms and subroutine types.
#[derive(Clone, Debug, Default)]
pub struct FType {
    /// Ordered formal parameters.
    pub parms: Vec<NodeId>,
    /// `DW_TAG_unspecified_parameters` was present.
    pub unspec_parms: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LexBlock {
    pub addr: u64,
    pub size: u64,
    /// Ordered child tags: parameters, variables, labels, sub-blocks,
    /// inline expansions.
    pub tags: Vec<NodeId>,
    pub nr_variables: u16,
    pub nr_labels: u16,
    pub nr_inline_expansions: u16,
    pub nr_lexblocks: u16,
    /// Sum of the sizes of all inline expansions in this block.
    pub size_inline_expansions: u64,
}

#[derive(Clone, Debug, Default)]
pub struct Function {
    pub proto: FType,
    pub block: LexBlock,
    pub name: StringId,
    pub linkage_name: StringId,
    /// `DW_AT_inline` value.
    pub inlined: u8,
    pub external: bool,
    /// Had a `DW_AT_abstract_origin` reference.
    pub abstract_origin: bool,
    pub accessibility: u8,
    pub virtuality: u8,
    /// Vtable entry offset for virtual member functions.
    pub vtable_entry: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct InlineExpansion {
    pub addr: u64,
    pub high_pc: u64,
    /// Contiguous size, or the sum of the expansion's ranges when the
    /// instance is split across several.
    pub size: u64,
}

/// Kind-specific payload. Several kinds share one payload the way the
/// related DIEs share attributes: all simple qualifiers and imports carry no
/// data of their own, struct and class share [`Class`], union/typedef/enum
/// share [`Type`].
#[derive(Clone, Debug)]
pub enum TagData {
    Simple,
    PtrToMember(PtrToMember),
    Base(BaseType),
    Array(ArrayType),
    Enumerator(Enumerator),
    Type(Type),
    Class(Class),
    Namespace(Namespace),
    Member(ClassMember),
    Parameter(Parameter),
    Variable(Variable),
    Label(Label),
    Ftype(FType),
    Function(Box<Function>),
    LexBlock(LexBlock),
    InlineExpansion(InlineExpansion),
}

/// One model node.
#[derive(Clone, Debug)]
pub struct Tag {
    pub kind: TagKind,
    /// Direct child of the compile unit DIE.
    pub top_level: bool,
    /// Dense reference into one of the CU's tables, valid after recode.
    /// For most kinds this indexes `types_table` (0 is void); for inline
    /// expansions and imported modules it indexes `tags_table`,
    /// `functions_table` or `types_table` depending on what the reference
    /// named.
    pub type_id: u32,
    /// Back-pointer to the node's dwarf-side scratch record. `None` for
    /// types synthesized during bitfield recode.
    pub(crate) scratch: Option<ScratchId>,
    pub data: TagData,
}

impl Tag {
    /// True for nodes created during recode rather than parsed from a DIE.
    pub fn is_synthetic(&self) -> bool {
        self.scratch.is_none()
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        match &self.data {
            TagData::Namespace(ns) => Some(ns),
            TagData::Type(t) => Some(&t.namespace),
            TagData::Class(c) => Some(&c.ty.namespace),
            _ => None,
        }
    }

    pub(crate) fn namespace_mut(&mut self) -> Option<&mut Namespace> {
        match &mut self.data {
            TagData::Namespace(ns) => Some(ns),
            TagData::Type(t) => Some(&mut t.namespace),
            TagData::Class(c) => Some(&mut c.ty.namespace),
            _ => None,
        }
    }

    /// The [`Type`] payload of union/typedef/enumeration/struct/class tags.
    pub fn type_payload(&self) -> Option<&Type> {
        match &self.data {
            TagData::Type(t) => Some(t),
            TagData::Class(c) => Some(&c.ty),
            _ => None,
        }
    }

    pub(crate) fn type_payload_mut(&mut self) -> Option<&mut Type> {
        match &mut self.data {
            TagData::Type(t) => Some(t),
            TagData::Class(c) => Some(&mut c.ty),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<&Class> {
        match &self.data {
            TagData::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn member(&self) -> Option<&ClassMember> {
        match &self.data {
            TagData::Member(m) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn member_mut(&mut self) -> Option<&mut ClassMember> {
        match &mut self.data {
            TagData::Member(m) => Some(m),
            _ => None,
        }
    }

    /// The function-type view of subroutine types and subprograms.
    pub fn ftype(&self) -> Option<&FType> {
        match &self.data {
            TagData::Ftype(f) => Some(f),
            TagData::Function(f) => Some(&f.proto),
            _ => None,
        }
    }

    pub(crate) fn ftype_mut(&mut self) -> Option<&mut FType> {
        match &mut self.data {
            TagData::Ftype(f) => Some(f),
            TagData::Function(f) => Some(&mut f.proto),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&Function> {
        match &self.data {
            TagData::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn function_mut(&mut self) -> Option<&mut Function> {
        match &mut self.data {
            TagData::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The lexical-block view of subprograms and lexical blocks.
    pub fn lexblock(&self) -> Option<&LexBlock> {
        match &self.data {
            TagData::LexBlock(b) => Some(b),
            TagData::Function(f) => Some(&f.block),
            _ => None,
        }
    }

    pub(crate) fn lexblock_mut(&mut self) -> Option<&mut LexBlock> {
        match &mut self.data {
            TagData::LexBlock(b) => Some(b),
            TagData::Function(f) => Some(&mut f.block),
            _ => None,
        }
    }

    pub fn variable(&self) -> Option<&Variable> {
        match &self.data {
            TagData::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn base_type(&self) -> Option<&BaseType> {
        match &self.data {
            TagData::Base(b) => Some(b),
            _ => None,
        }
    }

    pub fn array(&self) -> Option<&ArrayType> {
        match &self.data {
            TagData::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Name of the tag, for the kinds that have one.
    pub fn name(&self) -> Option<StringId> {
        match &self.data {
            TagData::Base(b) => Some(b.name),
            TagData::Enumerator(e) => Some(e.name),
            TagData::Member(m) => Some(m.name),
            TagData::Parameter(p) => Some(p.name),
            TagData::Variable(v) => Some(v.name),
            TagData::Label(l) => Some(l.name),
            TagData::Function(f) => Some(f.name),
            _ => self.namespace().map(|ns| ns.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_predicates() {
        assert!(TagKind::Namespace.is_type());
        assert!(TagKind::SubroutineType.is_type());
        assert!(!TagKind::Subprogram.is_type());
        assert!(!TagKind::Variable.is_type());

        // typedefs resolve specifications but have no child list
        assert!(TagKind::Typedef.has_specification());
        assert!(!TagKind::Typedef.has_namespace());
        assert!(TagKind::Enumeration.has_namespace());
        assert!(!TagKind::Namespace.has_specification());
    }

    #[test]
    fn test_shared_views() {
        let f = Tag {
            kind: TagKind::Subprogram,
            top_level: true,
            type_id: 0,
            scratch: None,
            data: TagData::Function(Box::default()),
        };
        assert!(f.ftype().is_some());
        assert!(f.lexblock().is_some());
        assert!(f.member().is_none());
    }
}
