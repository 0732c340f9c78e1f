//! File driver: open an ELF, borrow its DWARF sections, and load every
//! compilation unit
//!
//! Each CU goes through the strict serial pipeline parse -> recode ->
//! size-cache, then the caller's steal hook decides whether the CU is kept
//! in the collection, taken by the caller, or whether loading stops.

use crate::core::cu::{Cu, Cus};
use crate::core::errors::LoadError;
use crate::core::strings::StringTable;
use crate::parser::attributes::die_offset;
use crate::parser::die_parser::DieParser;
use crate::parser::recoder::recode_cu;
use crate::sizes::cache_member_sizes;
use gimli::{AttributeValue, EndianSlice, LittleEndian};
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::path::Path;
use tracing::{debug, warn};

/// What the steal hook decided about a freshly loaded CU.
pub enum CuSteal {
    /// Retain the CU in the collection.
    Keep(Box<Cu>),
    /// The hook took ownership of the CU; forget about it.
    Stolen,
    /// End the load early. Remaining CUs are not parsed.
    Stop,
}

/// Per-CU callback, run after parse, recode and size caching.
pub type StealHook<'s> = Box<dyn FnMut(Box<Cu>, &StringTable) -> CuSteal + 's>;

pub struct LoadConfig<'s> {
    /// Keep per-tag DIE origin information (offsets, decl file/line)
    /// alive after loading.
    pub extra_dbg_info: bool,
    /// Capture variable, label and block addresses.
    pub get_addr_info: bool,
    /// Zero the bitfield fields of members whose declared width equals
    /// their storage width (`int x : 32`).
    pub fixup_silly_bitfields: bool,
    pub steal: Option<StealHook<'s>>,
}

impl Default for LoadConfig<'_> {
    fn default() -> Self {
        Self {
            extra_dbg_info: false,
            get_addr_info: false,
            fixup_silly_bitfields: false,
            steal: None,
        }
    }
}

/// Load every compilation unit of the ELF object at `path` into `cus`.
pub fn load_file(cus: &mut Cus, conf: &mut LoadConfig, path: &Path) -> crate::Result<()> {
    let file = std::fs::File::open(path)?;
    let map = unsafe { memmap2::Mmap::map(&file)? };
    let object = object::File::parse(&map[..])?;
    let build_id = object.build_id()?.unwrap_or_default().to_vec();

    // Missing sections read as empty slices, the usual gimli arrangement
    let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
        Ok(object
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(Cow::Borrowed(&[][..])))
    };
    let sections = gimli::DwarfSections::load(load_section)?;
    let dwarf = sections.borrow(|section| EndianSlice::new(section.as_ref(), LittleEndian));

    load_dwarf(cus, conf, &dwarf, &build_id, &path.to_string_lossy())
}

/// Load every compilation unit of an already-opened DWARF handle.
pub fn load_dwarf(
    cus: &mut Cus,
    conf: &mut LoadConfig,
    dwarf: &gimli::Dwarf<EndianSlice<LittleEndian>>,
    build_id: &[u8],
    filename: &str,
) -> crate::Result<()> {
    let mut seen_units = false;
    let mut iter = dwarf.units();
    while let Some(header) = iter.next()? {
        seen_units = true;
        let unit = dwarf.unit(header)?;
        match load_unit(cus, conf, dwarf, &unit, build_id, filename)? {
            UnitOutcome::Continue => {}
            UnitOutcome::Stop => return Ok(()),
        }
    }
    if !seen_units {
        return Err(LoadError::NoDebugInfo {
            path: filename.into(),
        }
        .into());
    }
    Ok(())
}

enum UnitOutcome {
    Continue,
    Stop,
}

fn load_unit<'i>(
    cus: &mut Cus,
    conf: &mut LoadConfig,
    dwarf: &gimli::Dwarf<EndianSlice<'i, LittleEndian>>,
    unit: &gimli::Unit<EndianSlice<'i, LittleEndian>>,
    build_id: &[u8],
    filename: &str,
) -> crate::Result<UnitOutcome> {
    let mut tree = unit.entries_tree(None)?;
    let root = tree.root()?;
    let root_tag = root.entry().tag();
    if root_tag != gimli::DW_TAG_compile_unit {
        return Err(LoadError::WrongUnitRoot {
            tag: root_tag,
            offset: die_offset(root.entry(), unit),
        }
        .into());
    }

    // DW_AT_name can be missing from a compile unit
    let name = match root.entry().attr_value(gimli::DW_AT_name) {
        Ok(Some(value)) => dwarf
            .attr_string(unit, value)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => String::new(),
    };
    let language = match root.entry().attr_value(gimli::DW_AT_language) {
        Ok(Some(AttributeValue::Language(lang))) => lang,
        _ => gimli::DwLang(0),
    };

    let mut cu = Box::new(Cu::new(
        name,
        filename.to_string(),
        build_id.to_vec(),
        unit.header.address_size(),
        language,
        conf.extra_dbg_info,
        conf.get_addr_info,
    ));

    {
        let strings = cus.strings_mut();
        let mut parser = DieParser::new(dwarf, unit, &mut cu, strings);
        parser.process_unit(root)?;
    }

    // a sibling after the compile unit DIE is ignored with a complaint
    let mut cursor = unit.entries();
    if cursor.next_dfs()?.is_some() {
        if let Some(sibling) = cursor.next_sibling()? {
            warn!(
                "got {} unexpected tag after DW_TAG_compile_unit!",
                sibling.tag()
            );
        }
    }

    recode_cu(&mut cu)?;
    cache_member_sizes(&mut cu, cus.strings(), conf.fixup_silly_bitfields);

    debug!(
        "loaded CU {} from {}: {} types, {} tags, {} functions",
        cu.name,
        filename,
        cu.types_table.len() - 1,
        cu.tags_table.len(),
        cu.functions_table.len()
    );

    match conf.steal.as_mut() {
        Some(steal) => match steal(cu, cus.strings()) {
            CuSteal::Keep(mut cu) => {
                if !cu.extra_dbg_info {
                    cu.drop_scratch();
                }
                cus.add(cu);
            }
            CuSteal::Stolen => {}
            CuSteal::Stop => return Ok(UnitOutcome::Stop),
        },
        None => {
            if !cu.extra_dbg_info {
                cu.drop_scratch();
            }
            cus.add(cu);
        }
    }
    Ok(UnitOutcome::Continue)
}
