//! Finished extraction results and the store that keeps them.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::algorithm::Parameters;
use crate::codec::{self, CodecError, CodecResult};
use crate::dataset::VariableManager;
use crate::geom::{Point3, Vec3};

mod file;

pub use file::{ElementFileError, ElementFileFormat, ElementFileReader, ElementSource};

/// Upper bound on vertex/primitive counts accepted from a binary stream.
const MAX_PRIMITIVES: usize = 1 << 26;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Arrow {
    pub base: Point3,
    pub direction: Vec3,
}

/// Renderable output of an extraction algorithm, in world space.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Geometry {
    #[default]
    Empty,
    Triangles {
        vertices: Vec<Point3>,
        triangles: Vec<[u32; 3]>,
    },
    Polyline {
        points: Vec<Point3>,
    },
    Arrows {
        arrows: Vec<Arrow>,
    },
}

impl Geometry {
    const TAG_EMPTY: u8 = 0;
    const TAG_TRIANGLES: u8 = 1;
    const TAG_POLYLINE: u8 = 2;
    const TAG_ARROWS: u8 = 3;

    /// Triangles, line segments or arrows, depending on the variant.
    #[must_use]
    pub fn primitive_count(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Triangles { triangles, .. } => triangles.len(),
            Self::Polyline { points } => points.len().saturating_sub(1),
            Self::Arrows { arrows } => arrows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primitive_count() == 0
    }

    /// Surfaces are drawn in the transparent pass.
    #[must_use]
    pub const fn is_transparent(&self) -> bool {
        matches!(self, Self::Triangles { .. })
    }

    pub fn write_binary<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        match self {
            Self::Empty => codec::write_u8(out, Self::TAG_EMPTY),
            Self::Triangles {
                vertices,
                triangles,
            } => {
                codec::write_u8(out, Self::TAG_TRIANGLES)?;
                codec::write_len(out, vertices.len())?;
                for &p in vertices {
                    codec::write_point(out, p)?;
                }
                codec::write_len(out, triangles.len())?;
                for triangle in triangles {
                    for &index in triangle {
                        codec::write_u32(out, index)?;
                    }
                }
                Ok(())
            }
            Self::Polyline { points } => {
                codec::write_u8(out, Self::TAG_POLYLINE)?;
                codec::write_len(out, points.len())?;
                points.iter().try_for_each(|&p| codec::write_point(out, p))
            }
            Self::Arrows { arrows } => {
                codec::write_u8(out, Self::TAG_ARROWS)?;
                codec::write_len(out, arrows.len())?;
                for arrow in arrows {
                    codec::write_point(out, arrow.base)?;
                    codec::write_vec(out, arrow.direction)?;
                }
                Ok(())
            }
        }
    }

    pub fn read_binary<R: Read + ?Sized>(input: &mut R) -> CodecResult<Self> {
        match codec::read_u8(input)? {
            Self::TAG_EMPTY => Ok(Self::Empty),
            Self::TAG_TRIANGLES => {
                let count = codec::read_len(input, "vertex count", MAX_PRIMITIVES)?;
                let vertices = (0..count)
                    .map(|_| codec::read_point(input))
                    .collect::<CodecResult<Vec<_>>>()?;
                let count = codec::read_len(input, "triangle count", MAX_PRIMITIVES)?;
                let mut triangles = Vec::with_capacity(count);
                for _ in 0..count {
                    let triangle = [
                        codec::read_u32(input)?,
                        codec::read_u32(input)?,
                        codec::read_u32(input)?,
                    ];
                    if triangle.iter().any(|&i| i as usize >= vertices.len()) {
                        return Err(CodecError::Unexpected {
                            line: 0,
                            expected: format!("vertex index below {}", vertices.len()),
                            found: format!("{triangle:?}"),
                        });
                    }
                    triangles.push(triangle);
                }
                Ok(Self::Triangles {
                    vertices,
                    triangles,
                })
            }
            Self::TAG_POLYLINE => {
                let count = codec::read_len(input, "polyline length", MAX_PRIMITIVES)?;
                let points = (0..count)
                    .map(|_| codec::read_point(input))
                    .collect::<CodecResult<_>>()?;
                Ok(Self::Polyline { points })
            }
            Self::TAG_ARROWS => {
                let count = codec::read_len(input, "arrow count", MAX_PRIMITIVES)?;
                let mut arrows = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    arrows.push(Arrow {
                        base: codec::read_point(input)?,
                        direction: codec::read_vec(input)?,
                    });
                }
                Ok(Self::Arrows { arrows })
            }
            tag => Err(CodecError::Unexpected {
                line: 0,
                expected: "geometry tag 0..=3".to_string(),
                found: tag.to_string(),
            }),
        }
    }
}

/// A finished, renderable extraction result.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    parameters: Box<dyn Parameters>,
    geometry: Geometry,
}

impl Element {
    #[must_use]
    pub fn new(name: impl Into<String>, parameters: Box<dyn Parameters>, geometry: Geometry) -> Self {
        Self {
            name: name.into(),
            parameters,
            geometry,
        }
    }

    /// Name of the algorithm that produced the element.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameters(&self) -> &dyn Parameters {
        self.parameters.as_ref()
    }

    #[must_use]
    pub const fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredElement {
    element: Element,
    visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementSummary {
    pub name: String,
    pub primitives: usize,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub count: usize,
    pub elements: Vec<ElementSummary>,
}

/// Ordered list of extracted elements with per-element visibility.
#[derive(Debug, Default, Clone)]
pub struct ElementStore {
    entries: Vec<StoredElement>,
}

impl ElementStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a visible element and returns its position.
    pub fn add(&mut self, element: Element) -> usize {
        log::debug!("element store: added {}", element.name());
        self.entries.push(StoredElement {
            element,
            visible: true,
        });
        self.entries.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Element> {
        self.entries.get(index).map(|e| &e.element)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.entries.iter().map(|e| &e.element)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(Element::name).collect()
    }

    /// Returns `false` when `index` is out of range.
    pub fn set_visible(&mut self, index: usize, visible: bool) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.visible = visible;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_visible(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(|e| e.visible)
    }

    fn visible(&self) -> impl Iterator<Item = &Element> {
        self.entries
            .iter()
            .filter(|e| e.visible)
            .map(|e| &e.element)
    }

    pub fn visible_opaque(&self) -> impl Iterator<Item = &Element> {
        self.visible().filter(|e| !e.geometry().is_transparent())
    }

    pub fn visible_transparent(&self) -> impl Iterator<Item = &Element> {
        self.visible().filter(|e| e.geometry().is_transparent())
    }

    /// Writes every visible element in `format`. Binary output ends with a
    /// zero-length name.
    pub fn write(
        &self,
        out: &mut dyn Write,
        format: ElementFileFormat,
        variables: &VariableManager,
    ) -> io::Result<()> {
        for element in self.visible() {
            match format {
                ElementFileFormat::Ascii => {
                    writeln!(out, "{}", element.name())?;
                    element.parameters().write_ascii(out, variables)?;
                }
                ElementFileFormat::Binary => {
                    codec::write_string(out, element.name())?;
                    element.parameters().write_binary(out)?;
                }
            }
        }
        if format == ElementFileFormat::Binary {
            codec::write_u32(out, 0)?;
        }
        Ok(())
    }

    pub fn save(
        &self,
        path: &Path,
        format: ElementFileFormat,
        variables: &VariableManager,
    ) -> Result<(), ElementFileError> {
        let open_error = |source| ElementFileError::Open {
            path: path.display().to_string(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(open_error)?);
        self.write(&mut out, format, variables)?;
        out.flush()?;
        log::info!("saved {} elements to {}", self.visible().count(), path.display());
        Ok(())
    }

    #[must_use]
    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            count: self.entries.len(),
            elements: self
                .entries
                .iter()
                .map(|e| ElementSummary {
                    name: e.element.name().to_string(),
                    primitives: e.element.geometry().primitive_count(),
                    visible: e.visible,
                })
                .collect(),
        }
    }
}

/// First `<dir>/<stem><NNNN>.<ext>` that does not exist yet.
#[must_use]
pub fn next_numbered_path(dir: &Path, stem: &str, digits: usize, format: ElementFileFormat) -> PathBuf {
    (0u64..)
        .map(|n| dir.join(format!("{stem}{n:0digits$}.{}", format.extension())))
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}.{}", format.extension())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{Algorithm, Isosurface, Streamline};
    use crate::dataset::tests::linear_data_set;
    use crate::geom::Transform;

    fn element(name: &str, geometry: Geometry) -> Element {
        Element::new(name, Isosurface::new(0).default_parameters(), geometry)
    }

    fn triangle() -> Geometry {
        Geometry::Triangles {
            vertices: vec![Point3::ORIGIN, Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            triangles: vec![[0, 1, 2]],
        }
    }

    #[test]
    fn binary_geometry_survives_the_wire() {
        let shapes = [
            Geometry::Empty,
            triangle(),
            Geometry::Polyline {
                points: vec![Point3::ORIGIN, Point3::new(0.0, 0.0, 2.0)],
            },
            Geometry::Arrows {
                arrows: vec![Arrow {
                    base: Point3::new(1.0, 2.0, 3.0),
                    direction: Vec3::Z,
                }],
            },
        ];
        for shape in shapes {
            let mut bytes = Vec::new();
            shape.write_binary(&mut bytes).expect("write");
            let copy = Geometry::read_binary(&mut bytes.as_slice()).expect("read");
            assert_eq!(copy, shape);
        }
    }

    #[test]
    fn triangle_index_out_of_range_is_rejected() {
        let mut bytes = Vec::new();
        Geometry::Triangles {
            vertices: vec![Point3::ORIGIN],
            triangles: vec![[0, 0, 5]],
        }
        .write_binary(&mut bytes)
        .expect("write");
        match Geometry::read_binary(&mut bytes.as_slice()) {
            Err(CodecError::Unexpected { .. }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn visibility_splits_render_passes() {
        let mut store = ElementStore::new();
        store.add(element("Isosurface", triangle()));
        store.add(element(
            "Streamline",
            Geometry::Polyline {
                points: vec![Point3::ORIGIN, Point3::new(1.0, 1.0, 1.0)],
            },
        ));
        assert_eq!(store.visible_transparent().count(), 1);
        assert_eq!(store.visible_opaque().count(), 1);

        assert!(store.set_visible(0, false));
        assert!(!store.set_visible(7, false));
        assert_eq!(store.visible_transparent().count(), 0);
        assert_eq!(store.summary().elements[0], ElementSummary {
            name: "Isosurface".to_string(),
            primitives: 1,
            visible: false,
        });

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn ascii_output_skips_hidden_elements() {
        let ds = linear_data_set(Transform::identity());
        let variables = VariableManager::new(&ds);
        let mut store = ElementStore::new();
        store.add(element("Isosurface", Geometry::Empty));
        let hidden = store.add(Element::new(
            "Streamline",
            Streamline::new(0).default_parameters(),
            Geometry::Empty,
        ));
        store.set_visible(hidden, false);

        let mut out = Vec::new();
        store
            .write(&mut out, ElementFileFormat::Ascii, &variables)
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Isosurface\nscalarVariable Linear\n"));
        assert!(!text.contains("Streamline"));
    }

    #[test]
    fn numbered_paths_skip_existing_files() {
        let dir = std::env::temp_dir().join(format!("vatr-numbered-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let first = next_numbered_path(&dir, "SavedElements", 4, ElementFileFormat::Ascii);
        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("SavedElements0000.asciielem"));
        std::fs::write(&first, b"").expect("touch");
        let second = next_numbered_path(&dir, "SavedElements", 4, ElementFileFormat::Ascii);
        assert_eq!(second.file_name().and_then(|n| n.to_str()), Some("SavedElements0001.asciielem"));
        std::fs::remove_dir_all(&dir).expect("cleanup");
    }
}
