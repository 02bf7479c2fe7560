//! Extended-XYZ trajectory reader.
//!
//! A file is a sequence of frames, each an atom count line, a comment line
//! and one line per atom. The comment line may carry `Lattice="ax ay az bx
//! by bz cx cy cz"` and a `Properties=name:type:cols:...` column schema.
//! Without a schema the columns are `species x y z`.
//!
//! Recognized columns: `species` (S), `pos` (R:3), `base_type` (S, values
//! `catalyst` / `chemical`) and `surface_vector` (R:3, read from the first
//! frame; zero rows are ignored).

use std::path::Path;

use glam::{Mat3, Vec3};

use crate::error::TrajviewError;

/// Role of an atom in a reaction, used for base-type coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaseType {
    /// Neither catalyst nor chemical.
    #[default]
    Other,
    /// Part of the catalyst surface.
    Catalyst,
    /// Part of the reacting chemical.
    Chemical,
}

/// Parsed contents of an extended-XYZ file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XyzTrajectory {
    /// Element symbol per atom.
    pub species: Vec<String>,
    /// Positions per frame.
    pub frames: Vec<Vec<Vec3>>,
    /// Cell vectors as columns, if any frame declared a lattice.
    pub lattice: Option<Mat3>,
    /// Base type per atom.
    pub base_types: Vec<BaseType>,
    /// `(atom, vector)` surface vectors of the first frame.
    pub surface_vectors: Vec<(u32, Vec3)>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Columns {
    species: usize,
    pos: usize,
    base_type: Option<usize>,
    surface_vector: Option<usize>,
    width: usize,
}

fn parse_error(line: usize, msg: impl std::fmt::Display) -> TrajviewError {
    TrajviewError::TrajectoryParse(format!("line {line}: {msg}"))
}

/// Value of `key=...` in a comment line, with or without quotes.
fn comment_value<'a>(comment: &'a str, key: &str) -> Option<&'a str> {
    let start = comment.find(&format!("{key}="))? + key.len() + 1;
    let rest = &comment[start..];
    if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()
    } else {
        rest.split_whitespace().next()
    }
}

fn parse_lattice(value: &str, line: usize) -> Result<Mat3, TrajviewError> {
    let numbers: Vec<f32> = value
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|e| parse_error(line, format!("bad lattice: {e}")))?;
    if numbers.len() != 9 {
        return Err(parse_error(line, "lattice needs nine numbers"));
    }
    Ok(Mat3::from_cols(
        Vec3::new(numbers[0], numbers[1], numbers[2]),
        Vec3::new(numbers[3], numbers[4], numbers[5]),
        Vec3::new(numbers[6], numbers[7], numbers[8]),
    ))
}

fn parse_columns(comment: &str, line: usize) -> Result<Columns, TrajviewError> {
    let Some(schema) = comment_value(comment, "Properties") else {
        return Ok(Columns {
            species: 0,
            pos: 1,
            width: 4,
            ..Columns::default()
        });
    };
    let fields: Vec<&str> = schema.split(':').collect();
    if fields.len() % 3 != 0 {
        return Err(parse_error(line, "Properties needs name:type:count triples"));
    }
    let mut species = None;
    let mut pos = None;
    let mut columns = Columns::default();
    for triple in fields.chunks_exact(3) {
        let count: usize = triple[2]
            .parse()
            .map_err(|e| parse_error(line, format!("bad column count: {e}")))?;
        match triple[0] {
            "species" => species = Some(columns.width),
            "pos" => pos = Some(columns.width),
            "base_type" => columns.base_type = Some(columns.width),
            "surface_vector" => columns.surface_vector = Some(columns.width),
            _ => {}
        }
        columns.width += count;
    }
    columns.species = species.ok_or_else(|| parse_error(line, "no species column"))?;
    columns.pos = pos.ok_or_else(|| parse_error(line, "no pos column"))?;
    Ok(columns)
}

fn parse_vec3(fields: &[&str], at: usize, line: usize) -> Result<Vec3, TrajviewError> {
    let mut v = [0.0f32; 3];
    for (i, out) in v.iter_mut().enumerate() {
        *out = fields
            .get(at + i)
            .ok_or_else(|| parse_error(line, "missing coordinate"))?
            .parse()
            .map_err(|e| parse_error(line, format!("bad coordinate: {e}")))?;
    }
    Ok(Vec3::from_array(v))
}

/// Parse an extended-XYZ document.
///
/// # Errors
///
/// Returns [`TrajviewError::TrajectoryParse`] on malformed input, when no
/// frame is present or when frames disagree on atom count or species.
pub fn parse(source: &str) -> Result<XyzTrajectory, TrajviewError> {
    let mut out = XyzTrajectory::default();
    let mut lines = source.lines().enumerate().map(|(i, l)| (i + 1, l));

    while let Some((line, header)) = lines.next() {
        if header.trim().is_empty() {
            continue;
        }
        let count: usize = header
            .trim()
            .parse()
            .map_err(|e| parse_error(line, format!("bad atom count: {e}")))?;
        let (comment_line, comment) = lines
            .next()
            .ok_or_else(|| parse_error(line, "missing comment line"))?;
        if let Some(lattice) = comment_value(comment, "Lattice") {
            out.lattice = Some(parse_lattice(lattice, comment_line)?);
        }
        let columns = parse_columns(comment, comment_line)?;
        let first = out.frames.is_empty();

        let mut positions = Vec::with_capacity(count);
        for atom in 0..count {
            let (line, text) = lines
                .next()
                .ok_or_else(|| parse_error(line, format!("expected {count} atoms")))?;
            let fields: Vec<&str> = text.split_whitespace().collect();
            if fields.len() < columns.width {
                return Err(parse_error(line, "too few columns"));
            }
            let symbol = fields[columns.species];
            positions.push(parse_vec3(&fields, columns.pos, line)?);

            if first {
                out.species.push(symbol.to_owned());
                let base = match columns.base_type.map(|c| fields[c]) {
                    Some(s) if s.eq_ignore_ascii_case("catalyst") => BaseType::Catalyst,
                    Some(s) if s.eq_ignore_ascii_case("chemical") => BaseType::Chemical,
                    _ => BaseType::Other,
                };
                out.base_types.push(base);
                if let Some(c) = columns.surface_vector {
                    let v = parse_vec3(&fields, c, line)?;
                    if v.length_squared() > 0.0 {
                        out.surface_vectors.push((atom as u32, v));
                    }
                }
            } else if out.species.get(atom).map(String::as_str) != Some(symbol) {
                return Err(parse_error(line, "species differ from the first frame"));
            }
        }
        out.frames.push(positions);
    }

    if out.frames.is_empty() {
        return Err(TrajviewError::TrajectoryParse("no frames".into()));
    }
    Ok(out)
}

/// Read and parse an extended-XYZ file.
///
/// # Errors
///
/// Returns [`TrajviewError::Io`] if the file cannot be read, otherwise the
/// errors of [`parse`].
pub fn load(path: &Path) -> Result<XyzTrajectory, TrajviewError> {
    let source = std::fs::read_to_string(path)?;
    let trajectory = parse(&source)?;
    log::info!(
        "read {} frames of {} atoms from {}",
        trajectory.frames.len(),
        trajectory.species.len(),
        path.display()
    );
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_FRAMES: &str = "\
2
Lattice=\"10 0 0 0 10 0 0 0 12\" Properties=species:S:1:pos:R:3:base_type:S:1:surface_vector:R:3
Pt 0 0 0 catalyst 0 0 2
O 1 1 1 chemical 0 0 0
2
Lattice=\"10 0 0 0 10 0 0 0 12\" Properties=species:S:1:pos:R:3:base_type:S:1:surface_vector:R:3
Pt 0 0 0 catalyst 0 0 2
O 1.5 1 1 chemical 0 0 0
";

    #[test]
    fn reads_frames_lattice_and_extra_columns() {
        let t = parse(TWO_FRAMES).unwrap();
        assert_eq!(t.frames.len(), 2);
        assert_eq!(t.species, vec!["Pt", "O"]);
        assert_eq!(t.frames[1][1], Vec3::new(1.5, 1.0, 1.0));
        assert_eq!(t.lattice.unwrap().z_axis, Vec3::new(0.0, 0.0, 12.0));
        assert_eq!(t.base_types, vec![BaseType::Catalyst, BaseType::Chemical]);
        assert_eq!(t.surface_vectors, vec![(0, Vec3::new(0.0, 0.0, 2.0))]);
    }

    #[test]
    fn plain_xyz_uses_default_columns() {
        let t = parse("1\ncomment\nC 1 2 3\n").unwrap();
        assert_eq!(t.frames, vec![vec![Vec3::new(1.0, 2.0, 3.0)]]);
        assert_eq!(t.lattice, None);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let err = parse("3\ncomment\nC 0 0 0\n").unwrap_err();
        assert!(matches!(err, TrajviewError::TrajectoryParse(_)));
    }

    #[test]
    fn species_must_match_across_frames() {
        let err = parse("1\n\nC 0 0 0\n1\n\nO 0 0 0\n").unwrap_err();
        assert!(err.to_string().contains("species"));
    }
}
