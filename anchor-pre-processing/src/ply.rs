/// PLY container access: typed per-property columns for one element, and
/// float element writing for the viewer layout.
use crate::bounds::AnchorBounds;
use crate::error::{ConvertError, Result};
use constants::POSITION_FIELDS;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

const HEADER_FIELD: &str = "ply header";
const BODY_FIELD: &str = "ply body";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

impl PlyFormat {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "ascii" => Some(Self::Ascii),
            "binary_little_endian" => Some(Self::BinaryLittleEndian),
            "binary_big_endian" => Some(Self::BinaryBigEndian),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::BinaryLittleEndian => "binary_little_endian",
            Self::BinaryBigEndian => "binary_big_endian",
        }
    }
}

/// Scalar property types accepted in a PLY header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::I8),
            "uchar" | "uint8" => Some(Self::U8),
            "short" | "int16" => Some(Self::I16),
            "ushort" | "uint16" => Some(Self::U16),
            "int" | "int32" => Some(Self::I32),
            "uint" | "uint32" => Some(Self::U32),
            "float" | "float32" => Some(Self::F32),
            "double" | "float64" => Some(Self::F64),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "char",
            Self::U8 => "uchar",
            Self::I16 => "short",
            Self::U16 => "ushort",
            Self::I32 => "int",
            Self::U32 => "uint",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Self::F32 | Self::F64)
    }

    /// Decode one binary value. `bytes` holds at least `self.size()` bytes.
    fn decode(self, bytes: &[u8], big_endian: bool) -> f64 {
        macro_rules! read {
            ($ty:ty) => {{
                let raw = fixed::<{ std::mem::size_of::<$ty>() }>(bytes);
                if big_endian {
                    <$ty>::from_be_bytes(raw) as f64
                } else {
                    <$ty>::from_le_bytes(raw) as f64
                }
            }};
        }

        match self {
            Self::I8 => read!(i8),
            Self::U8 => read!(u8),
            Self::I16 => read!(i16),
            Self::U16 => read!(u16),
            Self::I32 => read!(i32),
            Self::U32 => read!(u32),
            Self::F32 => read!(f32),
            Self::F64 => read!(f64),
        }
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub scalar: ScalarType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    pub name: String,
    pub count: usize,
    pub properties: Vec<PropertyDef>,
}

impl ElementDef {
    fn row_size(&self) -> usize {
        self.properties.iter().map(|p| p.scalar.size()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlyHeader {
    pub format: PlyFormat,
    pub elements: Vec<ElementDef>,
}

impl PlyHeader {
    /// Header describing a single element of float properties.
    pub fn float_element(element: &str, count: usize, property_names: &[String]) -> Self {
        Self {
            format: PlyFormat::BinaryLittleEndian,
            elements: vec![ElementDef {
                name: element.to_string(),
                count,
                properties: property_names
                    .iter()
                    .map(|name| PropertyDef {
                        name: name.clone(),
                        scalar: ScalarType::F32,
                    })
                    .collect(),
            }],
        }
    }

    /// Parse the header, leaving `reader` positioned at the first body byte.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let magic = next_header_line(reader)?;
        if magic != "ply" {
            return Err(ConvertError::format(HEADER_FIELD, "missing `ply` magic line"));
        }

        let mut format = None;
        let mut elements: Vec<ElementDef> = Vec::new();

        loop {
            let line = next_header_line(reader)?;
            let tokens: Vec<&str> = line.split_whitespace().collect();

            match tokens.as_slice() {
                ["end_header"] => break,
                [] | ["comment", ..] | ["obj_info", ..] => continue,
                ["format", name, _version] => {
                    format = Some(PlyFormat::parse(name).ok_or_else(|| {
                        ConvertError::format(HEADER_FIELD, format!("unknown format `{}`", name))
                    })?);
                }
                ["element", name, count] => {
                    let count = count.parse().map_err(|_| {
                        ConvertError::format(
                            HEADER_FIELD,
                            format!("invalid count `{}` for element `{}`", count, name),
                        )
                    })?;
                    elements.push(ElementDef {
                        name: name.to_string(),
                        count,
                        properties: Vec::new(),
                    });
                }
                ["property", "list", .., name] => {
                    return Err(ConvertError::format(
                        *name,
                        "list properties are not supported",
                    ));
                }
                ["property", scalar, name] => {
                    let scalar = ScalarType::parse(scalar).ok_or_else(|| {
                        ConvertError::format(*name, format!("unknown property type `{}`", scalar))
                    })?;
                    let element = elements.last_mut().ok_or_else(|| {
                        ConvertError::format(*name, "property declared before any element")
                    })?;
                    if element.properties.iter().any(|p| p.name == *name) {
                        return Err(ConvertError::format(
                            *name,
                            format!("declared twice in element `{}`", element.name),
                        ));
                    }
                    element.properties.push(PropertyDef {
                        name: name.to_string(),
                        scalar,
                    });
                }
                _ => {
                    return Err(ConvertError::format(
                        HEADER_FIELD,
                        format!("unrecognised header line `{}`", line),
                    ));
                }
            }
        }

        let format =
            format.ok_or_else(|| ConvertError::format(HEADER_FIELD, "missing format line"))?;
        Ok(Self { format, elements })
    }

    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "ply")?;
        writeln!(writer, "format {} 1.0", self.format.name())?;
        for element in &self.elements {
            writeln!(writer, "element {} {}", element.name, element.count)?;
            for property in &element.properties {
                writeln!(writer, "property {} {}", property.scalar.name(), property.name)?;
            }
        }
        writeln!(writer, "end_header")
    }

    pub fn element(&self, name: &str) -> Option<&ElementDef> {
        self.elements.iter().find(|e| e.name == name)
    }
}

fn next_header_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| ConvertError::format(HEADER_FIELD, e.to_string()))?;
    if read == 0 {
        return Err(ConvertError::format(HEADER_FIELD, "unexpected end of header"));
    }
    Ok(line.trim().to_string())
}

/// Values of one property, widened to f64 alongside their declared type.
#[derive(Debug, Clone)]
pub struct Column {
    pub scalar: ScalarType,
    pub values: Vec<f64>,
}

/// One element of a PLY file as named typed columns.
#[derive(Debug, Clone)]
pub struct PlyTable {
    header: PlyHeader,
    element: String,
    len: usize,
    columns: HashMap<String, Column>,
}

impl PlyTable {
    pub fn open(path: &Path, element: &str) -> Result<Self> {
        let file = File::open(path).map_err(|e| ConvertError::io(path, e))?;
        Self::read(BufReader::new(file), element)
    }

    /// Read `element` from a PLY stream; elements preceding it are skipped.
    pub fn read<R: BufRead>(mut reader: R, element: &str) -> Result<Self> {
        let header = PlyHeader::read(&mut reader)?;
        let target = header
            .element(element)
            .ok_or_else(|| ConvertError::format(element, "element not found in container"))?
            .clone();

        let mut columns = None;
        for def in &header.elements {
            let keep = def.name == target.name;
            let decoded = match header.format {
                PlyFormat::Ascii => read_ascii_element(&mut reader, def, keep)?,
                PlyFormat::BinaryLittleEndian => read_binary_element(&mut reader, def, false, keep)?,
                PlyFormat::BinaryBigEndian => read_binary_element(&mut reader, def, true, keep)?,
            };
            if keep {
                columns = Some(decoded);
                break;
            }
        }

        let columns = columns.unwrap_or_default();
        Ok(Self {
            element: target.name.clone(),
            len: target.count,
            columns,
            header,
        })
    }

    pub fn header(&self) -> &PlyHeader {
        &self.header
    }

    pub fn element_name(&self) -> &str {
        &self.element
    }

    /// Number of rows (points) in the element.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Property names in declaration order.
    pub fn property_names(&self) -> Vec<&str> {
        self.header
            .element(&self.element)
            .map(|def| def.properties.iter().map(|p| p.name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| ConvertError::format(name, "missing field"))
    }

    pub fn values(&self, name: &str) -> Result<&[f64]> {
        Ok(&self.column(name)?.values)
    }

    /// Positions as single-precision points.
    pub fn points(&self) -> Result<Vec<[f32; 3]>> {
        let [x, y, z] = POSITION_FIELDS.map(|name| self.values(name));
        let (x, y, z) = (x?, y?, z?);
        Ok((0..self.len)
            .map(|i| [x[i] as f32, y[i] as f32, z[i] as f32])
            .collect())
    }

    /// Min/max over x, y, z.
    pub fn bounds(&self) -> Result<AnchorBounds> {
        Ok(AnchorBounds::from_points(&self.points()?))
    }
}

/// Rows reserved up front; the declared count is not trusted beyond this.
const MAX_RESERVED_ROWS: usize = 1 << 20;

fn empty_columns(def: &ElementDef) -> Vec<Vec<f64>> {
    def.properties
        .iter()
        .map(|_| Vec::with_capacity(def.count.min(MAX_RESERVED_ROWS)))
        .collect()
}

fn into_column_map(def: &ElementDef, values: Vec<Vec<f64>>) -> HashMap<String, Column> {
    def.properties
        .iter()
        .zip(values)
        .map(|(property, values)| {
            (
                property.name.clone(),
                Column {
                    scalar: property.scalar,
                    values,
                },
            )
        })
        .collect()
}

fn read_binary_element<R: Read>(
    reader: &mut R,
    def: &ElementDef,
    big_endian: bool,
    keep: bool,
) -> Result<HashMap<String, Column>> {
    let row_size = def.row_size();
    let expected = row_size.checked_mul(def.count).ok_or_else(|| {
        ConvertError::format(
            BODY_FIELD,
            format!(
                "element `{}` declares {} rows of {} bytes, beyond addressable size",
                def.name, def.count, row_size
            ),
        )
    })?;

    let mut body = Vec::new();
    reader
        .by_ref()
        .take(expected as u64)
        .read_to_end(&mut body)
        .map_err(|e| ConvertError::format(BODY_FIELD, e.to_string()))?;
    if body.len() != expected {
        return Err(ConvertError::format(
            BODY_FIELD,
            format!(
                "element `{}` truncated: {} rows of {} bytes expected, {} bytes present",
                def.name,
                def.count,
                row_size,
                body.len()
            ),
        ));
    }

    if !keep {
        return Ok(HashMap::new());
    }

    let mut values = empty_columns(def);
    for row in body.chunks_exact(row_size.max(1)).take(def.count) {
        let mut offset = 0;
        for (property, column) in def.properties.iter().zip(values.iter_mut()) {
            column.push(property.scalar.decode(&row[offset..], big_endian));
            offset += property.scalar.size();
        }
    }

    Ok(into_column_map(def, values))
}

fn read_ascii_element<R: BufRead>(
    reader: &mut R,
    def: &ElementDef,
    keep: bool,
) -> Result<HashMap<String, Column>> {
    let mut values = empty_columns(def);
    let mut line = String::new();

    for row in 0..def.count {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .map_err(|e| ConvertError::format(BODY_FIELD, e.to_string()))?;
        if read == 0 {
            return Err(ConvertError::format(
                BODY_FIELD,
                format!("element `{}` truncated at row {}", def.name, row),
            ));
        }
        if !keep {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != def.properties.len() {
            return Err(ConvertError::format(
                BODY_FIELD,
                format!(
                    "row {} of `{}` has {} values, expected {}",
                    row,
                    def.name,
                    tokens.len(),
                    def.properties.len()
                ),
            ));
        }

        for ((property, column), token) in def.properties.iter().zip(values.iter_mut()).zip(tokens)
        {
            let value: f64 = token.parse().map_err(|_| {
                ConvertError::format(
                    property.name.as_str(),
                    format!("invalid number `{}` at row {}", token, row),
                )
            })?;
            column.push(value);
        }
    }

    Ok(into_column_map(def, values))
}

/// Write a single float element: header followed by little-endian rows.
/// `rows` yields exactly `count` rows of `property_names.len()` values each.
pub fn write_float_element<'a, W, I>(
    writer: &mut W,
    element: &str,
    property_names: &[String],
    count: usize,
    rows: I,
) -> std::io::Result<()>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = &'a [f32]>,
{
    PlyHeader::float_element(element, count, property_names).write(writer)?;

    let mut bytes = Vec::with_capacity(property_names.len() * 4);
    let mut written = 0;
    for row in rows {
        debug_assert_eq!(row.len(), property_names.len());
        bytes.clear();
        for &value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        writer.write_all(&bytes)?;
        written += 1;
    }

    if written != count {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("element `{}` declared {} rows, wrote {}", element, count, written),
        ));
    }
    Ok(())
}
