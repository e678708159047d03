use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Serialize;

use super::DataSet;
use crate::codec::{CodecError, TokenReader};

#[derive(Debug, thiserror::Error)]
pub enum PaletteError {
    #[error("cannot open palette file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed palette file: {0}")]
    Format(#[from] CodecError),
    #[error("palette needs at least two control points, found {0}")]
    TooFewPoints(usize),
    #[error("no scalar variable is selected")]
    NoScalarVariable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControlPoint {
    pub value: f64,
    pub color: [f32; 4],
}

/// Piecewise-linear color map over a scalar range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Palette {
    points: Vec<ControlPoint>,
}

impl Palette {
    /// Blue-to-red ramp over `[min, max]`.
    #[must_use]
    pub fn ramp(min: f64, max: f64) -> Self {
        let max = if max > min { max } else { min + 1.0 };
        Self {
            points: vec![
                ControlPoint {
                    value: min,
                    color: [0.0, 0.0, 1.0, 1.0],
                },
                ControlPoint {
                    value: max,
                    color: [1.0, 0.0, 0.0, 1.0],
                },
            ],
        }
    }

    /// Reads `value r g b a` entries until end of input.
    pub fn read(reader: &mut TokenReader<'_>) -> Result<Self, PaletteError> {
        let mut points = Vec::new();
        while let Some(token) = reader.read_token()? {
            let value: f64 = token.parse().map_err(|_| CodecError::Unexpected {
                line: reader.line(),
                expected: "control point value".to_string(),
                found: token,
            })?;
            let mut color = [0.0f32; 4];
            for c in &mut color {
                *c = reader.parse("color component")?;
            }
            points.push(ControlPoint { value, color });
        }
        if points.len() < 2 {
            return Err(PaletteError::TooFewPoints(points.len()));
        }
        points.sort_by(|a, b| a.value.total_cmp(&b.value));
        Ok(Self { points })
    }

    pub fn load(path: &Path) -> Result<Self, PaletteError> {
        let file = File::open(path).map_err(|source| PaletteError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::read(&mut TokenReader::new(BufReader::new(file)))
    }

    #[must_use]
    pub fn control_points(&self) -> &[ControlPoint] {
        &self.points
    }

    #[must_use]
    pub fn color_at(&self, value: f64) -> [f32; 4] {
        let Some(first) = self.points.first() else {
            return [1.0; 4];
        };
        if value <= first.value {
            return first.color;
        }
        for pair in self.points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if value <= b.value {
                let span = b.value - a.value;
                let t = if span > 0.0 { ((value - a.value) / span) as f32 } else { 1.0 };
                let mut color = [0.0f32; 4];
                for (i, c) in color.iter_mut().enumerate() {
                    *c = a.color[i] + (b.color[i] - a.color[i]) * t;
                }
                return color;
            }
        }
        self.points[self.points.len() - 1].color
    }

    /// Adds a control point at `value` whose color keeps the map unchanged.
    pub fn insert_control_point(&mut self, value: f64) {
        let color = self.color_at(value);
        let at = self.points.partition_point(|p| p.value < value);
        if self.points.get(at).is_some_and(|p| p.value == value) {
            return;
        }
        self.points.insert(at, ControlPoint { value, color });
    }
}

/// Tracks the variables a data set offers, which ones are currently
/// selected, and the color map of each scalar variable.
#[derive(Debug, Clone, Serialize)]
pub struct VariableManager {
    scalar_names: Vec<String>,
    vector_names: Vec<String>,
    current_scalar: usize,
    current_vector: usize,
    palettes: Vec<Palette>,
}

impl VariableManager {
    #[must_use]
    pub fn new(data_set: &DataSet) -> Self {
        let scalar_names = data_set
            .scalar_variables()
            .iter()
            .map(|v| v.name.clone())
            .collect();
        let vector_names = data_set
            .vector_variables()
            .iter()
            .map(|v| v.name.clone())
            .collect();
        let palettes = data_set
            .scalar_variables()
            .iter()
            .map(|v| {
                let (lo, hi) = v.range();
                Palette::ramp(lo, hi)
            })
            .collect();
        Self {
            scalar_names,
            vector_names,
            current_scalar: 0,
            current_vector: 0,
            palettes,
        }
    }

    #[must_use]
    pub fn num_scalar_variables(&self) -> usize {
        self.scalar_names.len()
    }

    #[must_use]
    pub fn num_vector_variables(&self) -> usize {
        self.vector_names.len()
    }

    #[must_use]
    pub fn scalar_variable_name(&self, index: usize) -> Option<&str> {
        self.scalar_names.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn vector_variable_name(&self, index: usize) -> Option<&str> {
        self.vector_names.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn scalar_variable_index(&self, name: &str) -> Option<usize> {
        self.scalar_names.iter().position(|n| n == name)
    }

    #[must_use]
    pub fn vector_variable_index(&self, name: &str) -> Option<usize> {
        self.vector_names.iter().position(|n| n == name)
    }

    #[must_use]
    pub const fn current_scalar_variable(&self) -> usize {
        self.current_scalar
    }

    #[must_use]
    pub const fn current_vector_variable(&self) -> usize {
        self.current_vector
    }

    /// Out-of-range indices are ignored.
    pub fn set_current_scalar_variable(&mut self, index: usize) {
        if index < self.scalar_names.len() {
            self.current_scalar = index;
        }
    }

    pub fn set_current_vector_variable(&mut self, index: usize) {
        if index < self.vector_names.len() {
            self.current_vector = index;
        }
    }

    #[must_use]
    pub fn current_palette(&self) -> Option<&Palette> {
        self.palettes.get(self.current_scalar)
    }

    /// Replaces the current scalar variable's palette. On error the previous
    /// palette stays in place.
    pub fn load_palette(&mut self, path: &Path) -> Result<(), PaletteError> {
        let palette = Palette::load(path)?;
        let slot = self
            .palettes
            .get_mut(self.current_scalar)
            .ok_or(PaletteError::NoScalarVariable)?;
        *slot = palette;
        Ok(())
    }

    pub fn insert_palette_control_point(&mut self, value: f64) {
        if let Some(palette) = self.palettes.get_mut(self.current_scalar) {
            palette.insert_control_point(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::dataset::tests::linear_data_set;
    use crate::geom::Transform;

    #[test]
    fn reads_palette_entries_in_value_order() {
        let text = "1.0 1 0 0 1\n0.0 0 0 1 1\n";
        let palette = Palette::read(&mut TokenReader::new(Cursor::new(text.as_bytes())))
            .expect("palette");
        assert_eq!(palette.control_points()[0].value, 0.0);
        assert_eq!(palette.color_at(0.5), [0.5, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn single_entry_palette_is_rejected() {
        let result = Palette::read(&mut TokenReader::new(Cursor::new(&b"0 0 0 0 1"[..])));
        assert!(matches!(result, Err(PaletteError::TooFewPoints(1))));
    }

    #[test]
    fn inserted_control_point_keeps_colors() {
        let mut palette = Palette::ramp(0.0, 10.0);
        let before = palette.color_at(2.5);
        palette.insert_control_point(2.5);
        assert_eq!(palette.control_points().len(), 3);
        assert_eq!(palette.color_at(2.5), before);
        palette.insert_control_point(2.5);
        assert_eq!(palette.control_points().len(), 3);
    }

    #[test]
    fn failed_palette_load_keeps_previous_palette() {
        let mut variables = VariableManager::new(&linear_data_set(Transform::identity()));
        let before = variables.current_palette().cloned();
        let missing = std::env::temp_dir().join("vatr-engine-missing-palette.pal");
        assert!(variables.load_palette(&missing).is_err());
        assert_eq!(variables.current_palette().cloned(), before);
    }

    #[test]
    fn resolves_variable_names() {
        let variables = VariableManager::new(&linear_data_set(Transform::identity()));
        assert_eq!(variables.scalar_variable_index("Linear"), Some(0));
        assert_eq!(variables.vector_variable_index("Drift"), Some(0));
        assert_eq!(variables.scalar_variable_index("Drift"), None);
    }
}
