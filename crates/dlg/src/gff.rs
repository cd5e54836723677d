//! GFF (Generic File Format) container handling.
//!
//! GFF is the struct/field container BioWare's Aurora engine uses for most of
//! its game data. Everything is little-endian.
//!
//! ## GFF Structure
//!
//! A GFF file consists of:
//! - Header (56 bytes): signature, version, six (offset, count) pairs
//! - Struct table (12 bytes per struct)
//! - Field table (12 bytes per field)
//! - Label table (16 bytes per label)
//! - Field data blob (variable-size payloads)
//! - Field indices (u32 field indices for structs with more than one field)
//! - List indices (u32 count + u32 struct indices per list)
//!
//! Only the sections used by dialog files are supported. [`GffFile`] is a
//! borrowed, bounds-checked view over a whole buffer; [`GffBuilder`] is the
//! append-only table builder the writer fills and then flattens.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use indexmap::IndexSet;
use log::warn;
use std::io::Write;

use crate::error::{Error, Result};
use crate::field_data::{self, FieldDataBuilder};
use crate::types::LocString;

// ============================================================================
// GFF Constants
// ============================================================================

/// File signature of conversation files.
pub const DLG_SIGNATURE: [u8; 4] = *b"DLG ";

/// GFF version. The format revision is "V3.28"; only four bytes fit the slot.
pub const GFF_VERSION: [u8; 4] = *b"V3.2";

/// Struct type of the top-level struct.
pub const ROOT_STRUCT_TYPE: u32 = 0xFFFF_FFFF;

/// Size of a label slot in bytes.
pub const LABEL_SIZE: usize = 16;

/// GFF field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FieldType {
    Byte = 0,
    Char = 1,
    Word = 2,
    Short = 3,
    Dword = 4,
    Int = 5,
    Dword64 = 6,
    Int64 = 7,
    Float = 8,
    Double = 9,
    ExoString = 10,
    ResRef = 11,
    LocString = 12,
    Void = 13,
    Struct = 14,
    List = 15,
}

impl FieldType {
    /// Parse a field type from its wire code.
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => FieldType::Byte,
            1 => FieldType::Char,
            2 => FieldType::Word,
            3 => FieldType::Short,
            4 => FieldType::Dword,
            5 => FieldType::Int,
            6 => FieldType::Dword64,
            7 => FieldType::Int64,
            8 => FieldType::Float,
            9 => FieldType::Double,
            10 => FieldType::ExoString,
            11 => FieldType::ResRef,
            12 => FieldType::LocString,
            13 => FieldType::Void,
            14 => FieldType::Struct,
            15 => FieldType::List,
            _ => return None,
        })
    }

    /// True if the field stores a byte offset into the field-data blob.
    pub fn uses_field_data(self) -> bool {
        matches!(
            self,
            FieldType::Dword64
                | FieldType::Int64
                | FieldType::Double
                | FieldType::ExoString
                | FieldType::ResRef
                | FieldType::LocString
                | FieldType::Void
        )
    }
}

// ============================================================================
// Bounds-checked reads
// ============================================================================

/// Little-endian view over one section of the input buffer.
///
/// Offsets passed in are relative to the section; errors report absolute
/// file positions.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
    base: usize,
}

impl<'a> ByteView<'a> {
    /// View over a whole buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, base: 0 }
    }

    /// Length of the viewed section.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow `len` bytes at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[offset..end]),
            _ => Err(Error::BufferBoundaryViolation {
                offset: self.base.saturating_add(offset),
                len,
                size: self.base + self.data.len(),
            }),
        }
    }

    /// Sub-view of `len` bytes at `offset`.
    pub fn section(&self, offset: usize, len: usize) -> Result<ByteView<'a>> {
        Ok(ByteView {
            data: self.slice(offset, len)?,
            base: self.base + offset,
        })
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.slice(offset, 4)?))
    }

    pub fn u64_at(&self, offset: usize) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.slice(offset, 8)?))
    }

    /// Read `count` consecutive u32 values at `offset`.
    pub fn u32_array(&self, offset: usize, count: usize) -> Result<Vec<u32>> {
        let len = count.checked_mul(4).ok_or(Error::BufferBoundaryViolation {
            offset: self.base.saturating_add(offset),
            len: usize::MAX,
            size: self.base + self.data.len(),
        })?;
        let bytes = self.slice(offset, len)?;
        Ok(bytes.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }
}

// ============================================================================
// Header
// ============================================================================

/// GFF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GffHeader {
    /// File type signature (should be DLG_SIGNATURE).
    pub signature: [u8; 4],
    /// Format version (should be GFF_VERSION).
    pub version: [u8; 4],
    pub struct_offset: u32,
    pub struct_count: u32,
    pub field_offset: u32,
    pub field_count: u32,
    pub label_offset: u32,
    pub label_count: u32,
    pub field_data_offset: u32,
    /// Size of the field data blob in bytes.
    pub field_data_size: u32,
    pub field_indices_offset: u32,
    /// Size of the field indices section in bytes.
    pub field_indices_size: u32,
    pub list_indices_offset: u32,
    /// Size of the list indices section in bytes.
    pub list_indices_size: u32,
}

impl GffHeader {
    /// The size of the GFF header in bytes.
    pub const SIZE: usize = 56;

    /// Lay out the sections back to back after the header.
    ///
    /// Offsets are accumulated in file order, so every size must be final.
    pub fn for_sections(
        struct_count: u32,
        field_count: u32,
        label_count: u32,
        field_data_size: u32,
        field_indices_size: u32,
        list_indices_size: u32,
    ) -> Self {
        let struct_offset = Self::SIZE as u32;
        let field_offset = struct_offset + struct_count * GffStruct::SIZE as u32;
        let label_offset = field_offset + field_count * GffField::SIZE as u32;
        let field_data_offset = label_offset + label_count * LABEL_SIZE as u32;
        let field_indices_offset = field_data_offset + field_data_size;
        let list_indices_offset = field_indices_offset + field_indices_size;

        Self {
            signature: DLG_SIGNATURE,
            version: GFF_VERSION,
            struct_offset,
            struct_count,
            field_offset,
            field_count,
            label_offset,
            label_count,
            field_data_offset,
            field_data_size,
            field_indices_offset,
            field_indices_size,
            list_indices_offset,
            list_indices_size,
        }
    }

    /// Read and validate a header from the start of a buffer.
    ///
    /// Checks signature, version, section order, and that every section
    /// lies inside the buffer.
    pub fn read(data: &[u8]) -> Result<Self> {
        let view = ByteView::new(data);
        let head = view.slice(0, Self::SIZE)?;

        let mut signature = [0u8; 4];
        signature.copy_from_slice(&head[0..4]);
        if signature != DLG_SIGNATURE {
            return Err(Error::InvalidSignature {
                expected: String::from_utf8_lossy(&DLG_SIGNATURE).into_owned(),
                actual: String::from_utf8_lossy(&signature).into_owned(),
            });
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&head[4..8]);
        if version != GFF_VERSION {
            return Err(Error::InvalidSignature {
                expected: String::from_utf8_lossy(&GFF_VERSION).into_owned(),
                actual: String::from_utf8_lossy(&version).into_owned(),
            });
        }

        let field = |i: usize| LittleEndian::read_u32(&head[8 + i * 4..12 + i * 4]);
        let header = Self {
            signature,
            version,
            struct_offset: field(0),
            struct_count: field(1),
            field_offset: field(2),
            field_count: field(3),
            label_offset: field(4),
            label_count: field(5),
            field_data_offset: field(6),
            field_data_size: field(7),
            field_indices_offset: field(8),
            field_indices_size: field(9),
            list_indices_offset: field(10),
            list_indices_size: field(11),
        };

        header.validate_layout(data.len())?;
        Ok(header)
    }

    /// Section order and buffer-fit checks.
    fn validate_layout(&self, buffer_len: usize) -> Result<()> {
        let sections = self.sections();

        if (sections[0].1 as usize) < Self::SIZE {
            return Err(Error::InvalidFormat(format!(
                "struct table offset {} overlaps the header",
                sections[0].1
            )));
        }
        for pair in sections.windows(2) {
            let (prev_name, prev_offset, _) = pair[0];
            let (name, offset, _) = pair[1];
            if offset < prev_offset {
                return Err(Error::InvalidFormat(format!(
                    "{} offset {} precedes {} offset {}",
                    name, offset, prev_name, prev_offset
                )));
            }
        }
        for (_, offset, len) in sections {
            let end = (offset as u64) + len;
            if end > buffer_len as u64 {
                return Err(Error::BufferBoundaryViolation {
                    offset: offset as usize,
                    len: len as usize,
                    size: buffer_len,
                });
            }
        }
        Ok(())
    }

    /// (name, offset, byte length) of each section in file order.
    fn sections(&self) -> [(&'static str, u32, u64); 6] {
        [
            (
                "struct table",
                self.struct_offset,
                self.struct_count as u64 * GffStruct::SIZE as u64,
            ),
            (
                "field table",
                self.field_offset,
                self.field_count as u64 * GffField::SIZE as u64,
            ),
            (
                "label table",
                self.label_offset,
                self.label_count as u64 * LABEL_SIZE as u64,
            ),
            (
                "field data",
                self.field_data_offset,
                self.field_data_size as u64,
            ),
            (
                "field indices",
                self.field_indices_offset,
                self.field_indices_size as u64,
            ),
            (
                "list indices",
                self.list_indices_offset,
                self.list_indices_size as u64,
            ),
        ]
    }

    /// Write a header to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.signature)?;
        writer.write_all(&self.version)?;
        writer.write_u32::<LittleEndian>(self.struct_offset)?;
        writer.write_u32::<LittleEndian>(self.struct_count)?;
        writer.write_u32::<LittleEndian>(self.field_offset)?;
        writer.write_u32::<LittleEndian>(self.field_count)?;
        writer.write_u32::<LittleEndian>(self.label_offset)?;
        writer.write_u32::<LittleEndian>(self.label_count)?;
        writer.write_u32::<LittleEndian>(self.field_data_offset)?;
        writer.write_u32::<LittleEndian>(self.field_data_size)?;
        writer.write_u32::<LittleEndian>(self.field_indices_offset)?;
        writer.write_u32::<LittleEndian>(self.field_indices_size)?;
        writer.write_u32::<LittleEndian>(self.list_indices_offset)?;
        writer.write_u32::<LittleEndian>(self.list_indices_size)?;
        Ok(())
    }
}

// ============================================================================
// Table records
// ============================================================================

/// Struct table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GffStruct {
    /// Program-defined struct type.
    pub struct_type: u32,
    /// Field index when `field_count == 1`, otherwise a byte offset into the
    /// field indices section.
    pub data_or_offset: u32,
    pub field_count: u32,
}

impl GffStruct {
    /// The size of a struct record in bytes.
    pub const SIZE: usize = 12;

    fn read(view: &ByteView, offset: usize) -> Result<Self> {
        Ok(Self {
            struct_type: view.u32_at(offset)?,
            data_or_offset: view.u32_at(offset + 4)?,
            field_count: view.u32_at(offset + 8)?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.struct_type)?;
        writer.write_u32::<LittleEndian>(self.data_or_offset)?;
        writer.write_u32::<LittleEndian>(self.field_count)?;
        Ok(())
    }
}

/// Field table record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GffField {
    pub field_type: u32,
    pub label_index: u32,
    /// Inline value for small scalars, otherwise an offset or struct index.
    pub data_or_offset: u32,
}

impl GffField {
    /// The size of a field record in bytes.
    pub const SIZE: usize = 12;

    fn read(view: &ByteView, offset: usize) -> Result<Self> {
        Ok(Self {
            field_type: view.u32_at(offset)?,
            label_index: view.u32_at(offset + 4)?,
            data_or_offset: view.u32_at(offset + 8)?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(self.field_type)?;
        writer.write_u32::<LittleEndian>(self.label_index)?;
        writer.write_u32::<LittleEndian>(self.data_or_offset)?;
        Ok(())
    }
}

/// Encode a label into its 16-byte slot, truncating longer names.
pub fn encode_label(label: &str) -> [u8; LABEL_SIZE] {
    let mut slot = [0u8; LABEL_SIZE];
    let bytes = label.as_bytes();
    let len = bytes.len().min(LABEL_SIZE);
    slot[..len].copy_from_slice(&bytes[..len]);
    slot
}

/// Decode a label slot up to the first NUL or the end of the slot.
pub fn decode_label(slot: &[u8]) -> String {
    let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
    String::from_utf8_lossy(&slot[..end]).into_owned()
}

/// Insertion-ordered label table. Each distinct label is stored once.
#[derive(Debug, Default)]
pub struct LabelTable {
    labels: IndexSet<String>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `label`, adding it if it has not been seen.
    pub fn intern(&mut self, label: &str) -> u32 {
        let label = if label.len() > LABEL_SIZE {
            warn!("Label {:?} longer than {} bytes, truncating", label, LABEL_SIZE);
            decode_label(&encode_label(label))
        } else {
            label.to_string()
        };
        let (index, _) = self.labels.insert_full(label);
        index as u32
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        for label in &self.labels {
            writer.write_all(&encode_label(label))?;
        }
        Ok(())
    }
}

// ============================================================================
// Field values
// ============================================================================

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum GffValue {
    Byte(u8),
    Char(i8),
    Word(u16),
    Short(i16),
    Dword(u32),
    Int(i32),
    Dword64(u64),
    Int64(i64),
    Float(f32),
    Double(f64),
    ExoString(String),
    ResRef(String),
    LocString(LocString),
    Void(Vec<u8>),
    /// Struct table index.
    Struct(u32),
    /// Struct table indices of the list elements.
    List(Vec<u32>),
}

impl GffValue {
    /// Integer value of any integer-typed field that fits in a u32.
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            GffValue::Byte(v) => Some(v as u32),
            GffValue::Char(v) => Some(v as u8 as u32),
            GffValue::Word(v) => Some(v as u32),
            GffValue::Short(v) => Some(v as u16 as u32),
            GffValue::Dword(v) => Some(v),
            GffValue::Int(v) => Some(v as u32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_u32().map(|v| v != 0)
    }

    /// Text of a CExoString or CResRef field.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GffValue::ExoString(s) | GffValue::ResRef(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_loc_string(&self) -> Option<&LocString> {
        match self {
            GffValue::LocString(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[u32]> {
        match self {
            GffValue::List(v) => Some(v),
            _ => None,
        }
    }
}

/// Fields of one struct, resolved to (label, value) pairs in table order.
#[derive(Debug, Clone, Default)]
pub struct StructFields {
    pub struct_type: u32,
    pub fields: Vec<(String, GffValue)>,
}

impl StructFields {
    /// First field with this label.
    pub fn get(&self, label: &str) -> Option<&GffValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, value)| value)
    }

    pub fn has(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn u32_or(&self, label: &str, default: u32) -> u32 {
        self.get(label).and_then(GffValue::as_u32).unwrap_or(default)
    }

    pub fn bool_or(&self, label: &str, default: bool) -> bool {
        self.get(label).and_then(GffValue::as_bool).unwrap_or(default)
    }

    /// String field text, "" when absent.
    pub fn string(&self, label: &str) -> String {
        self.get(label)
            .and_then(GffValue::as_str)
            .unwrap_or_default()
            .to_string()
    }

    pub fn loc_string(&self, label: &str) -> LocString {
        self.get(label)
            .and_then(GffValue::as_loc_string)
            .cloned()
            .unwrap_or_default()
    }

    /// List element struct indices, empty when absent.
    pub fn list(&self, label: &str) -> &[u32] {
        self.get(label).and_then(GffValue::as_list).unwrap_or(&[])
    }
}

// ============================================================================
// Reading
// ============================================================================

/// A parsed GFF file borrowing the input buffer.
///
/// Tables are decoded eagerly; field values are decoded on demand through
/// [`GffFile::read_struct`].
#[derive(Debug)]
pub struct GffFile<'a> {
    header: GffHeader,
    structs: Vec<GffStruct>,
    fields: Vec<GffField>,
    labels: Vec<String>,
    field_data: ByteView<'a>,
    field_indices: ByteView<'a>,
    list_indices: ByteView<'a>,
}

impl<'a> GffFile<'a> {
    /// Parse the header and tables of a GFF buffer.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = GffHeader::read(data)?;
        let view = ByteView::new(data);

        let struct_view = view.section(
            header.struct_offset as usize,
            header.struct_count as usize * GffStruct::SIZE,
        )?;
        let structs = (0..header.struct_count as usize)
            .map(|i| GffStruct::read(&struct_view, i * GffStruct::SIZE))
            .collect::<Result<Vec<_>>>()?;
        if structs.is_empty() {
            return Err(Error::MissingRootStruct);
        }

        let field_view = view.section(
            header.field_offset as usize,
            header.field_count as usize * GffField::SIZE,
        )?;
        let fields = (0..header.field_count as usize)
            .map(|i| GffField::read(&field_view, i * GffField::SIZE))
            .collect::<Result<Vec<_>>>()?;

        let label_view = view.section(
            header.label_offset as usize,
            header.label_count as usize * LABEL_SIZE,
        )?;
        let labels = (0..header.label_count as usize)
            .map(|i| label_view.slice(i * LABEL_SIZE, LABEL_SIZE).map(decode_label))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            field_data: view.section(
                header.field_data_offset as usize,
                header.field_data_size as usize,
            )?,
            field_indices: view.section(
                header.field_indices_offset as usize,
                header.field_indices_size as usize,
            )?,
            list_indices: view.section(
                header.list_indices_offset as usize,
                header.list_indices_size as usize,
            )?,
            header,
            structs,
            fields,
            labels,
        })
    }

    pub fn header(&self) -> &GffHeader {
        &self.header
    }

    pub fn structs(&self) -> &[GffStruct] {
        &self.structs
    }

    pub fn fields(&self) -> &[GffField] {
        &self.fields
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Raw field indices section as u32 values.
    pub fn field_indices(&self) -> Result<Vec<u32>> {
        self.field_indices
            .u32_array(0, self.field_indices.len() / 4)
    }

    /// The top-level struct (index 0).
    pub fn root(&self) -> Result<&GffStruct> {
        self.structs.first().ok_or(Error::MissingRootStruct)
    }

    pub fn struct_at(&self, index: u32) -> Result<&GffStruct> {
        self.structs.get(index as usize).ok_or(Error::InvalidIndex {
            table: "struct",
            index,
            len: self.structs.len(),
        })
    }

    pub fn field_at(&self, index: u32) -> Result<&GffField> {
        self.fields.get(index as usize).ok_or(Error::InvalidIndex {
            table: "field",
            index,
            len: self.fields.len(),
        })
    }

    pub fn label_at(&self, index: u32) -> Result<&str> {
        self.labels
            .get(index as usize)
            .map(String::as_str)
            .ok_or(Error::InvalidIndex {
                table: "label",
                index,
                len: self.labels.len(),
            })
    }

    /// Field table indices owned by a struct.
    pub fn struct_field_indices(&self, gff_struct: &GffStruct) -> Result<Vec<u32>> {
        match gff_struct.field_count {
            0 => Ok(Vec::new()),
            1 => Ok(vec![gff_struct.data_or_offset]),
            n => self
                .field_indices
                .u32_array(gff_struct.data_or_offset as usize, n as usize),
        }
    }

    /// Struct indices stored for the list at `offset` in the list indices section.
    pub fn list_at(&self, offset: u32) -> Result<Vec<u32>> {
        let offset = offset as usize;
        let count = self.list_indices.u32_at(offset)? as usize;
        self.list_indices.u32_array(offset + 4, count)
    }

    /// Decode the value of one field.
    pub fn field_value(&self, field: &GffField) -> Result<GffValue> {
        let data = field.data_or_offset;
        let offset = data as usize;
        let field_type = FieldType::from_u32(field.field_type).ok_or_else(|| {
            Error::InvalidFormat(format!("unknown field type {}", field.field_type))
        })?;

        Ok(match field_type {
            FieldType::Byte => GffValue::Byte(data as u8),
            FieldType::Char => GffValue::Char(data as u8 as i8),
            FieldType::Word => GffValue::Word(data as u16),
            FieldType::Short => GffValue::Short(data as u16 as i16),
            FieldType::Dword => GffValue::Dword(data),
            FieldType::Int => GffValue::Int(data as i32),
            FieldType::Float => GffValue::Float(f32::from_bits(data)),
            FieldType::Dword64 => GffValue::Dword64(self.field_data.u64_at(offset)?),
            FieldType::Int64 => GffValue::Int64(self.field_data.u64_at(offset)? as i64),
            FieldType::Double => GffValue::Double(f64::from_bits(self.field_data.u64_at(offset)?)),
            FieldType::ExoString => {
                GffValue::ExoString(field_data::read_exo_string(&self.field_data, offset)?)
            }
            FieldType::ResRef => GffValue::ResRef(field_data::read_resref(&self.field_data, offset)?),
            FieldType::LocString => {
                GffValue::LocString(field_data::read_loc_string(&self.field_data, offset)?)
            }
            FieldType::Void => GffValue::Void(field_data::read_void(&self.field_data, offset)?),
            FieldType::Struct => GffValue::Struct(data),
            FieldType::List => GffValue::List(self.list_at(data)?),
        })
    }

    /// Resolve every field of a struct.
    ///
    /// Out-of-range field and label indices and unknown field types are
    /// logged and skipped so one bad record does not sink the parse. Reads past
    /// the end of a section are still fatal.
    pub fn read_struct(&self, index: u32) -> Result<StructFields> {
        let gff_struct = self.struct_at(index)?;
        let field_indices = self.struct_field_indices(gff_struct)?;
        let mut result = StructFields {
            struct_type: gff_struct.struct_type,
            fields: Vec::with_capacity(field_indices.len()),
        };

        for field_index in field_indices {
            let field = match self.field_at(field_index) {
                Ok(field) => field,
                Err(e) => {
                    warn!("Struct {}: skipping field: {}", index, e);
                    continue;
                }
            };
            let label = match self.label_at(field.label_index) {
                Ok(label) => label.to_string(),
                Err(e) => {
                    warn!("Struct {}: field {} has no label: {}", index, field_index, e);
                    String::new()
                }
            };
            match self.field_value(field) {
                Ok(value) => result.fields.push((label, value)),
                Err(e @ Error::BufferBoundaryViolation { .. }) => return Err(e),
                Err(e) => warn!("Struct {}: skipping field {:?}: {}", index, label, e),
            }
        }

        Ok(result)
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Append-only GFF table builder.
///
/// Structs reserve a contiguous run of field slots when they are begun; the
/// struct's fields must then be added before the next struct is begun. That
/// keeps the field indices section an identity sequence.
#[derive(Debug)]
pub struct GffBuilder {
    structs: Vec<GffStruct>,
    fields: Vec<GffField>,
    labels: LabelTable,
    field_data: FieldDataBuilder,
    reserved_fields: u32,
}

impl Default for GffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GffBuilder {
    pub fn new() -> Self {
        Self {
            structs: Vec::new(),
            fields: Vec::new(),
            labels: LabelTable::new(),
            field_data: FieldDataBuilder::new(),
            reserved_fields: 0,
        }
    }

    pub fn struct_count(&self) -> u32 {
        self.structs.len() as u32
    }

    pub fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    /// Allocate a struct and reserve `field_count` field slots for it.
    /// Returns the struct table index.
    pub fn begin_struct(&mut self, struct_type: u32, field_count: u32) -> u32 {
        assert_eq!(
            self.fields.len() as u32,
            self.reserved_fields,
            "struct {} begun before the previous struct's fields were written",
            self.structs.len()
        );

        let first_field = self.reserved_fields;
        let data_or_offset = match field_count {
            0 => 0,
            1 => first_field,
            _ => first_field * 4,
        };

        self.structs.push(GffStruct {
            struct_type,
            data_or_offset,
            field_count,
        });
        self.reserved_fields += field_count;
        (self.structs.len() - 1) as u32
    }

    fn push_field(&mut self, field_type: FieldType, label: &str, data_or_offset: u32) {
        assert!(
            (self.fields.len() as u32) < self.reserved_fields,
            "field {:?} written outside of any reserved struct range",
            label
        );
        let label_index = self.labels.intern(label);
        self.fields.push(GffField {
            field_type: field_type as u32,
            label_index,
            data_or_offset,
        });
    }

    pub fn add_byte(&mut self, label: &str, value: u8) {
        self.push_field(FieldType::Byte, label, value as u32);
    }

    pub fn add_dword(&mut self, label: &str, value: u32) {
        self.push_field(FieldType::Dword, label, value);
    }

    pub fn add_exo_string(&mut self, label: &str, value: &str) {
        let offset = self.field_data.add_exo_string(value);
        self.push_field(FieldType::ExoString, label, offset);
    }

    pub fn add_resref(&mut self, label: &str, value: &str) {
        let offset = self.field_data.add_resref(value);
        self.push_field(FieldType::ResRef, label, offset);
    }

    pub fn add_loc_string(&mut self, label: &str, value: &LocString) {
        let offset = self.field_data.add_loc_string(value);
        self.push_field(FieldType::LocString, label, offset);
    }

    /// Add a List field whose entry sits at `offset` in the list indices section.
    pub fn add_list(&mut self, label: &str, offset: u32) {
        self.push_field(FieldType::List, label, offset);
    }

    /// Flatten the tables into a complete file.
    ///
    /// Section order: header, structs, fields, labels, field data, field
    /// indices, list indices.
    pub fn finish(self, list_indices: &[u8]) -> Result<Vec<u8>> {
        assert_eq!(
            self.fields.len() as u32,
            self.reserved_fields,
            "last struct is missing fields"
        );

        let field_count = self.fields.len() as u32;
        let field_data = self.field_data.finish();
        let header = GffHeader::for_sections(
            self.structs.len() as u32,
            field_count,
            self.labels.len() as u32,
            field_data.len() as u32,
            field_count * 4,
            list_indices.len() as u32,
        );

        let total = header.list_indices_offset as usize + list_indices.len();
        let mut data = Vec::with_capacity(total);

        header.write(&mut data)?;
        for s in &self.structs {
            s.write(&mut data)?;
        }
        for f in &self.fields {
            f.write(&mut data)?;
        }
        self.labels.write(&mut data)?;
        data.extend_from_slice(&field_data);
        for index in 0..field_count {
            data.write_u32::<LittleEndian>(index)?;
        }
        data.extend_from_slice(list_indices);

        debug_assert_eq!(data.len(), total, "GFF size mismatch");
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_file() -> Vec<u8> {
        let mut builder = GffBuilder::new();
        builder.begin_struct(ROOT_STRUCT_TYPE, 2);
        builder.add_dword("NumWords", 7);
        builder.add_exo_string("Comment", "hi");
        builder.finish(&[]).unwrap()
    }

    #[test]
    fn test_header_roundtrip() {
        let header = GffHeader::for_sections(3, 5, 2, 16, 20, 8);
        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), GffHeader::SIZE);
        assert_eq!(&buffer[0..8], b"DLG V3.2");

        // Pad so every section fits.
        buffer.resize(header.list_indices_offset as usize + 8, 0);
        let read = GffHeader::read(&buffer).unwrap();
        assert_eq!(read, header);
        assert_eq!(read.field_offset, 56 + 3 * 12);
        assert_eq!(read.label_offset, read.field_offset + 5 * 12);
        assert_eq!(read.field_data_offset, read.label_offset + 2 * 16);
    }

    #[test]
    fn test_header_rejects_signature() {
        let mut data = minimal_file();
        data[0..4].copy_from_slice(b"GFF ");
        match GffHeader::read(&data) {
            Err(Error::InvalidSignature { expected, actual }) => {
                assert_eq!(expected, "DLG ");
                assert_eq!(actual, "GFF ");
            }
            other => panic!("expected InvalidSignature, got {:?}", other),
        }
    }

    #[test]
    fn test_header_rejects_version() {
        let mut data = minimal_file();
        data[4..8].copy_from_slice(b"V4.0");
        assert!(matches!(
            GffHeader::read(&data),
            Err(Error::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_header_rejects_out_of_order_sections() {
        let mut data = minimal_file();
        // Move the label table offset in front of the field table.
        LittleEndian::write_u32(&mut data[24..28], 60);
        assert!(matches!(
            GffHeader::read(&data),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_truncated_buffer_is_boundary_violation() {
        let data = minimal_file();
        for cut in [10, GffHeader::SIZE + 5, data.len() - 1] {
            assert!(
                matches!(
                    GffFile::parse(&data[..cut]),
                    Err(Error::BufferBoundaryViolation { .. })
                ),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_empty_struct_table_is_missing_root() {
        let builder = GffBuilder::new();
        let data = builder.finish(&[]).unwrap();
        assert!(matches!(GffFile::parse(&data), Err(Error::MissingRootStruct)));
    }

    #[test]
    fn test_read_struct_fields() {
        let data = minimal_file();
        let gff = GffFile::parse(&data).unwrap();
        let root = gff.read_struct(0).unwrap();
        assert_eq!(root.struct_type, ROOT_STRUCT_TYPE);
        assert_eq!(root.u32_or("NumWords", 0), 7);
        assert_eq!(root.string("Comment"), "hi");
        assert_eq!(root.string("Missing"), "");
        assert_eq!(gff.field_indices().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_label_dedup() {
        let mut builder = GffBuilder::new();
        builder.begin_struct(ROOT_STRUCT_TYPE, 2);
        builder.add_dword("Index", 1);
        builder.add_dword("Index", 2);
        let data = builder.finish(&[]).unwrap();
        let gff = GffFile::parse(&data).unwrap();
        assert_eq!(gff.labels(), &["Index".to_string()]);
        assert_eq!(gff.fields()[0].label_index, gff.fields()[1].label_index);
    }

    #[test]
    fn test_label_encoding() {
        assert_eq!(decode_label(&encode_label("EntriesList")), "EntriesList");
        let long = encode_label("ABCDEFGHIJKLMNOPQRST");
        assert_eq!(decode_label(&long), "ABCDEFGHIJKLMNOP");
        assert_eq!(decode_label(b"Key\0garbage\0\0\0\0\0"), "Key");
    }

    #[test]
    fn test_single_field_struct_uses_direct_index() {
        let mut builder = GffBuilder::new();
        builder.begin_struct(ROOT_STRUCT_TYPE, 2);
        builder.add_dword("A", 1);
        builder.add_dword("B", 2);
        builder.begin_struct(0, 1);
        builder.add_dword("C", 3);
        let data = builder.finish(&[]).unwrap();
        let gff = GffFile::parse(&data).unwrap();
        assert_eq!(gff.structs()[0].data_or_offset, 0);
        assert_eq!(gff.structs()[1].data_or_offset, 2);
        assert_eq!(gff.read_struct(1).unwrap().u32_or("C", 0), 3);
    }

    #[test]
    fn test_bad_label_index_recovers() {
        let mut data = minimal_file();
        let gff = GffFile::parse(&data).unwrap();
        let field_offset = gff.header().field_offset as usize;
        // Second field's label index -> out of range.
        LittleEndian::write_u32(&mut data[field_offset + 12 + 4..field_offset + 12 + 8], 99);

        let gff = GffFile::parse(&data).unwrap();
        let root = gff.read_struct(0).unwrap();
        assert_eq!(root.fields.len(), 2);
        assert_eq!(root.u32_or("NumWords", 0), 7);
        assert_eq!(root.fields[1].0, "");
    }

    #[test]
    fn test_bad_field_index_is_skipped() {
        let mut data = minimal_file();
        let gff = GffFile::parse(&data).unwrap();
        let indices_offset = gff.header().field_indices_offset as usize;
        LittleEndian::write_u32(&mut data[indices_offset..indices_offset + 4], 500);

        let gff = GffFile::parse(&data).unwrap();
        let root = gff.read_struct(0).unwrap();
        assert_eq!(root.fields.len(), 1);
        assert_eq!(root.string("Comment"), "hi");
        assert!(matches!(
            gff.struct_at(3),
            Err(Error::InvalidIndex { table: "struct", index: 3, len: 1 })
        ));
    }

    #[test]
    #[should_panic(expected = "begun before")]
    fn test_builder_rejects_interleaved_structs() {
        let mut builder = GffBuilder::new();
        builder.begin_struct(ROOT_STRUCT_TYPE, 2);
        builder.add_dword("A", 1);
        builder.begin_struct(0, 1);
    }
}
