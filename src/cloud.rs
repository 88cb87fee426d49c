//! Dense point-cloud message and its serialized form.
//!
//! A cloud is a row-major dense block of per-point records described by
//! named fields, the way streamed sensor clouds arrive on the wire:
//! `row_step = point_step * width`, arbitrary extra fields ignored.
//! Little-endian `f32` throughout for the fields this crate produces.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Vector3;
use std::io::{Read, Write};

use crate::error::{DishaError, Result};

/// Seconds since an arbitrary epoch shared by all inputs.
pub type Stamp = f64;

/// Datatype of a cloud field. Codes follow the usual wire convention
/// (UINT16 = 4, UINT32 = 6, FLOAT32 = 7, FLOAT64 = 8).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    U16,
    U32,
    F32,
    F64,
}

impl FieldType {
    pub fn size(self) -> usize {
        match self {
            FieldType::U16 => 2,
            FieldType::U32 => 4,
            FieldType::F32 => 4,
            FieldType::F64 => 8,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FieldType::U16 => 4,
            FieldType::U32 => 6,
            FieldType::F32 => 7,
            FieldType::F64 => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            4 => Some(FieldType::U16),
            6 => Some(FieldType::U32),
            7 => Some(FieldType::F32),
            8 => Some(FieldType::F64),
            _ => None,
        }
    }
}

/// A named field inside each point record.
#[derive(Clone, Debug)]
pub struct FieldDesc {
    pub name: String,
    pub offset: usize,
    pub datatype: FieldType,
}

/// Dense row-major point cloud.
#[derive(Clone, Debug)]
pub struct PointCloudMsg {
    pub frame_id: String,
    pub stamp: Stamp,
    pub width: u32,
    pub height: u32,
    pub fields: Vec<FieldDesc>,
    pub point_step: usize,
    pub row_step: usize,
    pub data: Vec<u8>,
}

impl PointCloudMsg {
    /// Number of points.
    pub fn len(&self) -> usize {
        (self.width * self.height) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDesc> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reject clouds whose layout is internally inconsistent.
    pub fn validate(&self) -> Result<()> {
        if self.row_step != self.point_step * self.width as usize {
            return Err(DishaError::BadCloud(format!(
                "row step {} does not match point step {} x width {}",
                self.row_step, self.point_step, self.width
            )));
        }
        if self.data.len() != self.row_step * self.height as usize {
            return Err(DishaError::BadCloud(format!(
                "data length {} does not match {} rows of {} bytes",
                self.data.len(),
                self.height,
                self.row_step
            )));
        }
        for f in &self.fields {
            if f.offset + f.datatype.size() > self.point_step {
                return Err(DishaError::BadCloud(format!(
                    "field {} overruns point step {}",
                    f.name, self.point_step
                )));
            }
        }
        Ok(())
    }

    /// Find a FLOAT32 field, rejecting wrong datatypes.
    pub fn f32_field(&self, name: &str) -> Result<&FieldDesc> {
        let field = self
            .field(name)
            .ok_or_else(|| DishaError::BadCloud(format!("missing field {}", name)))?;
        if field.datatype != FieldType::F32 {
            return Err(DishaError::BadCloud(format!(
                "field {} has unsupported type {:?}",
                name, field.datatype
            )));
        }
        Ok(field)
    }

    /// Find a FLOAT32 field that heads a packed 3-vector (`x,y,z` or
    /// `normal_x,normal_y,normal_z`), rejecting layouts without room
    /// for the two trailing components.
    pub fn f32_vec3_field(&self, name: &str) -> Result<&FieldDesc> {
        let field = self.f32_field(name)?;
        if field.offset + 12 > self.point_step {
            return Err(DishaError::BadCloud(format!(
                "field {} leaves no room for a 3-vector in point step {}",
                name, self.point_step
            )));
        }
        Ok(field)
    }

    /// Read a single f32 from a field of point `i`.
    pub fn get_f32(&self, field: &FieldDesc, i: usize) -> f32 {
        let at = i * self.point_step + field.offset;
        f32::from_le_bytes(self.data[at..at + 4].try_into().unwrap())
    }

    /// Read three consecutive f32 starting at a field of point `i`
    /// (e.g. `x,y,z` or `normal_x,normal_y,normal_z`).
    pub fn get_vec3(&self, field: &FieldDesc, i: usize) -> Vector3<f32> {
        let at = i * self.point_step + field.offset;
        Vector3::new(
            f32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()),
            f32::from_le_bytes(self.data[at + 4..at + 8].try_into().unwrap()),
            f32::from_le_bytes(self.data[at + 8..at + 12].try_into().unwrap()),
        )
    }

    /// Serialize header and data.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(b"DSH1")?;
        w.write_u16::<LittleEndian>(self.frame_id.len() as u16)?;
        w.write_all(self.frame_id.as_bytes())?;
        w.write_f64::<LittleEndian>(self.stamp)?;
        w.write_u32::<LittleEndian>(self.width)?;
        w.write_u32::<LittleEndian>(self.height)?;
        w.write_u32::<LittleEndian>(self.point_step as u32)?;
        w.write_u32::<LittleEndian>(self.row_step as u32)?;
        w.write_u16::<LittleEndian>(self.fields.len() as u16)?;
        for f in &self.fields {
            w.write_u16::<LittleEndian>(f.name.len() as u16)?;
            w.write_all(f.name.as_bytes())?;
            w.write_u32::<LittleEndian>(f.offset as u32)?;
            w.write_u8(f.datatype.code())?;
        }
        w.write_u64::<LittleEndian>(self.data.len() as u64)?;
        w.write_all(&self.data)?;
        Ok(())
    }

    /// Deserialize a cloud written by [`PointCloudMsg::write_to`].
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != b"DSH1" {
            return Err(DishaError::BadCloud("bad magic".to_string()));
        }
        let frame_id = read_string(r)?;
        let stamp = r.read_f64::<LittleEndian>()?;
        let width = r.read_u32::<LittleEndian>()?;
        let height = r.read_u32::<LittleEndian>()?;
        let point_step = r.read_u32::<LittleEndian>()? as usize;
        let row_step = r.read_u32::<LittleEndian>()? as usize;
        let n_fields = r.read_u16::<LittleEndian>()?;
        let mut fields = Vec::with_capacity(n_fields as usize);
        for _ in 0..n_fields {
            let name = read_string(r)?;
            let offset = r.read_u32::<LittleEndian>()? as usize;
            let code = r.read_u8()?;
            let datatype = FieldType::from_code(code)
                .ok_or_else(|| DishaError::BadCloud(format!("unknown field type {}", code)))?;
            fields.push(FieldDesc {
                name,
                offset,
                datatype,
            });
        }
        let data_len = r.read_u64::<LittleEndian>()? as usize;
        let mut data = vec![0u8; data_len];
        r.read_exact(&mut data)?;
        let cloud = Self {
            frame_id,
            stamp,
            width,
            height,
            fields,
            point_step,
            row_step,
            data,
        };
        cloud.validate()?;
        Ok(cloud)
    }

    /// Start building an all-FLOAT32 cloud.
    pub fn builder(frame_id: &str, stamp: Stamp) -> CloudBuilder {
        CloudBuilder {
            frame_id: frame_id.to_string(),
            stamp,
            fields: Vec::new(),
            count: 0,
            data: Vec::new(),
        }
    }
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| DishaError::BadCloud("non-utf8 name".to_string()))
}

/// Row-by-row builder for FLOAT32 clouds.
pub struct CloudBuilder {
    frame_id: String,
    stamp: Stamp,
    fields: Vec<String>,
    count: usize,
    data: Vec<u8>,
}

impl CloudBuilder {
    /// Append a FLOAT32 field. All fields must be declared before the
    /// first row.
    pub fn field(mut self, name: &str) -> Self {
        debug_assert_eq!(self.count, 0, "fields must precede rows");
        self.fields.push(name.to_string());
        self
    }

    /// Shorthand for the `x, y, z` position fields.
    pub fn position_fields(self) -> Self {
        self.field("x").field("y").field("z")
    }

    /// Shorthand for the `normal_x, normal_y, normal_z` fields.
    pub fn normal_fields(self) -> Self {
        self.field("normal_x").field("normal_y").field("normal_z")
    }

    /// Append one point record; `values` must match the declared fields.
    pub fn row(&mut self, values: &[f32]) {
        debug_assert_eq!(values.len(), self.fields.len());
        for v in values {
            self.data.extend_from_slice(&v.to_le_bytes());
        }
        self.count += 1;
    }

    pub fn finish(self) -> PointCloudMsg {
        let point_step = 4 * self.fields.len();
        let fields = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, name)| FieldDesc {
                name: name.clone(),
                offset: 4 * i,
                datatype: FieldType::F32,
            })
            .collect();
        PointCloudMsg {
            frame_id: self.frame_id,
            stamp: self.stamp,
            width: self.count as u32,
            height: 1,
            fields,
            point_step,
            row_step: point_step * self.count,
            data: self.data,
        }
    }
}

/// Build a bare-position cloud from a list of 3-vectors.
pub fn xyz_cloud(frame_id: &str, stamp: Stamp, points: &[Vector3<f32>]) -> PointCloudMsg {
    let mut builder = PointCloudMsg::builder(frame_id, stamp).position_fields();
    for p in points {
        builder.row(&[p.x, p.y, p.z]);
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud() -> PointCloudMsg {
        let mut builder = PointCloudMsg::builder("map", 12.5)
            .position_fields()
            .normal_fields();
        builder.row(&[1.0, 2.0, 3.0, 0.0, 0.0, 1.0]);
        builder.row(&[4.0, 5.0, 6.0, 0.0, 1.0, 0.0]);
        builder.finish()
    }

    #[test]
    fn test_builder_layout() {
        let cloud = sample_cloud();
        assert_eq!(cloud.len(), 2);
        assert_eq!(cloud.point_step, 24);
        assert_eq!(cloud.row_step, 48);
        cloud.validate().unwrap();

        let x = cloud.f32_field("x").unwrap().clone();
        assert_eq!(cloud.get_vec3(&x, 1), Vector3::new(4.0, 5.0, 6.0));
        let nx = cloud.f32_field("normal_x").unwrap().clone();
        assert_eq!(cloud.get_vec3(&nx, 0), Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_missing_field_is_bad_cloud() {
        let cloud = xyz_cloud("map", 0.0, &[Vector3::zeros()]);
        assert!(matches!(
            cloud.f32_field("normal_x"),
            Err(DishaError::BadCloud(_))
        ));
    }

    #[test]
    fn test_vec3_field_needs_room_for_three() {
        // "x" as the trailing field cannot head a position triplet.
        let mut builder = PointCloudMsg::builder("map", 0.0).field("intensity").field("x");
        builder.row(&[1.0, 2.0]);
        let cloud = builder.finish();
        assert!(cloud.f32_field("x").is_ok());
        assert!(matches!(
            cloud.f32_vec3_field("x"),
            Err(DishaError::BadCloud(_))
        ));
    }

    #[test]
    fn test_serialization_round_trip() {
        let cloud = sample_cloud();
        let mut buf = Vec::new();
        cloud.write_to(&mut buf).unwrap();
        let read = PointCloudMsg::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(read.frame_id, "map");
        assert_eq!(read.stamp, 12.5);
        assert_eq!(read.len(), 2);
        assert_eq!(read.data, cloud.data);
        let x = read.f32_field("x").unwrap().clone();
        assert_eq!(read.get_vec3(&x, 0), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_inconsistent_row_step_rejected() {
        let mut cloud = sample_cloud();
        cloud.row_step += 4;
        assert!(cloud.validate().is_err());
    }
}
