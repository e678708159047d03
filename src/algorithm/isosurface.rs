use std::any::Any;
use std::io::{self, Read, Write};

use super::{
    downcast, read_index, read_point_line, read_scalar_variable, write_index, write_point_line,
    write_scalar_variable, Algorithm, ExtractionError, Parameters, ProgressSink,
};
use crate::codec::{self, CodecResult, TokenReader};
use crate::dataset::{DataSet, VariableManager};
use crate::element::Geometry;
use crate::geom::Point3;

const NAME: &str = "Isosurface";

/// Cube corners around the main diagonal 0-7, one tetrahedron per entry.
/// Corner `n` sits at offset `((n >> 2) & 1, (n >> 1) & 1, n & 1)`.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 7, 1, 3],
    [0, 7, 3, 2],
    [0, 7, 2, 6],
    [0, 7, 6, 4],
    [0, 7, 4, 5],
    [0, 7, 5, 1],
];

#[derive(Debug, Clone, PartialEq)]
pub struct IsosurfaceParameters {
    pub variable: usize,
    pub isovalue: f64,
    pub seed: Point3,
}

impl Parameters for IsosurfaceParameters {
    fn write_ascii(&self, out: &mut dyn Write, variables: &VariableManager) -> io::Result<()> {
        write_scalar_variable(out, variables, self.variable)?;
        writeln!(out, "isovalue {}", self.isovalue)?;
        write_point_line(out, "seedPoint", self.seed)
    }

    fn read_ascii(
        &mut self,
        input: &mut TokenReader<'_>,
        variables: &VariableManager,
    ) -> CodecResult<()> {
        self.variable = read_scalar_variable(input, variables)?;
        input.expect_keyword("isovalue")?;
        self.isovalue = input.parse("isovalue")?;
        self.seed = read_point_line(input, "seedPoint")?;
        Ok(())
    }

    fn write_binary(&self, out: &mut dyn Write) -> io::Result<()> {
        write_index(out, self.variable)?;
        codec::write_f64(out, self.isovalue)?;
        codec::write_point(out, self.seed)
    }

    fn read_binary(&mut self, input: &mut dyn Read) -> CodecResult<()> {
        self.variable = read_index(input)?;
        self.isovalue = codec::read_f64(input)?;
        self.seed = codec::read_point(input)?;
        Ok(())
    }

    fn seed(&self) -> Point3 {
        self.seed
    }

    fn clone_box(&self) -> Box<dyn Parameters> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Isosurface through the seed point's value, extracted slab by slab with
/// marching tetrahedra.
#[derive(Debug, Clone, Copy)]
pub struct Isosurface {
    variable: usize,
}

impl Isosurface {
    #[must_use]
    pub const fn new(variable: usize) -> Self {
        Self { variable }
    }
}

impl Algorithm for Isosurface {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_incremental(&self) -> bool {
        true
    }

    fn default_parameters(&self) -> Box<dyn Parameters> {
        Box::new(IsosurfaceParameters {
            variable: self.variable,
            isovalue: 0.0,
            seed: Point3::ORIGIN,
        })
    }

    fn seed_parameters(&self, data_set: &DataSet, seed: Point3) -> Option<Box<dyn Parameters>> {
        let sample = data_set.locate(seed)?;
        let isovalue = data_set.scalar(self.variable, &sample)?;
        Some(Box::new(IsosurfaceParameters {
            variable: self.variable,
            isovalue,
            seed,
        }))
    }

    fn extract(
        &self,
        data_set: &DataSet,
        parameters: &dyn Parameters,
        progress: &mut dyn ProgressSink,
    ) -> Result<Geometry, ExtractionError> {
        let params = downcast::<IsosurfaceParameters>(parameters, NAME)?;
        let values = data_set
            .scalar_variables()
            .get(params.variable)
            .ok_or(ExtractionError::UnknownVariable {
                algorithm: NAME,
                index: params.variable,
            })?
            .values();

        let [nx, _, _] = data_set.grid().dims();
        let slabs = nx - 1;
        let mut corners = Vec::new();
        for i in 0..slabs {
            if progress.should_stop() {
                log::debug!("{NAME}: stopped after {i} of {slabs} slabs");
                break;
            }
            corners.extend(polygonize_slab(data_set, values, params.isovalue, i));
            progress.report(100.0 * (i + 1) as f32 / slabs as f32);
        }

        let vertices: Vec<Point3> = corners
            .into_iter()
            .map(|p| data_set.to_world().apply_point(p))
            .collect();
        let triangles = (0..vertices.len() / 3)
            .map(|t| {
                let base = (t * 3) as u32;
                [base, base + 1, base + 2]
            })
            .collect();
        Ok(Geometry::Triangles {
            vertices,
            triangles,
        })
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "parallel")] {
        fn polygonize_slab(data_set: &DataSet, values: &[f64], isovalue: f64, i: usize) -> Vec<Point3> {
            use rayon::prelude::*;

            let [_, ny, nz] = data_set.grid().dims();
            (0..ny - 1)
                .into_par_iter()
                .flat_map_iter(|j| {
                    let mut out = Vec::new();
                    for k in 0..nz - 1 {
                        polygonize_cell(data_set, values, isovalue, [i, j, k], &mut out);
                    }
                    out
                })
                .collect()
        }
    } else {
        fn polygonize_slab(data_set: &DataSet, values: &[f64], isovalue: f64, i: usize) -> Vec<Point3> {
            let [_, ny, nz] = data_set.grid().dims();
            let mut out = Vec::new();
            for j in 0..ny - 1 {
                for k in 0..nz - 1 {
                    polygonize_cell(data_set, values, isovalue, [i, j, k], &mut out);
                }
            }
            out
        }
    }
}

/// Appends triangle corners, in data coordinates, for one grid cell.
fn polygonize_cell(
    data_set: &DataSet,
    values: &[f64],
    isovalue: f64,
    [i, j, k]: [usize; 3],
    out: &mut Vec<Point3>,
) {
    let grid = data_set.grid();
    let mut p = [Point3::ORIGIN; 8];
    let mut v = [0.0f64; 8];
    for n in 0..8 {
        let ijk = [i + ((n >> 2) & 1), j + ((n >> 1) & 1), k + (n & 1)];
        p[n] = grid.vertex(ijk);
        v[n] = values[grid.vertex_index(ijk)];
        if !v[n].is_finite() {
            return;
        }
    }
    for tet in TETRAHEDRA {
        polygonize_tetrahedron(
            tet.map(|n| p[n]),
            tet.map(|n| v[n]),
            isovalue,
            out,
        );
    }
}

fn polygonize_tetrahedron(p: [Point3; 4], v: [f64; 4], isovalue: f64, out: &mut Vec<Point3>) {
    let edge = |a: usize, b: usize| {
        let span = v[b] - v[a];
        let t = if span.abs() > f64::EPSILON {
            ((isovalue - v[a]) / span).clamp(0.0, 1.0)
        } else {
            0.5
        };
        p[a].lerp(p[b], t)
    };

    let mut inside = [0usize; 4];
    let mut outside = [0usize; 4];
    let (mut n_in, mut n_out) = (0, 0);
    for n in 0..4 {
        if v[n] >= isovalue {
            inside[n_in] = n;
            n_in += 1;
        } else {
            outside[n_out] = n;
            n_out += 1;
        }
    }

    match n_in {
        1 | 3 => {
            let (lone, others) = if n_in == 1 {
                (inside[0], &outside[..3])
            } else {
                (outside[0], &inside[..3])
            };
            out.extend(others.iter().map(|&o| edge(lone, o)));
        }
        2 => {
            let (a, b) = (inside[0], inside[1]);
            let (c, d) = (outside[0], outside[1]);
            let (ac, ad, bd, bc) = (edge(a, c), edge(a, d), edge(b, d), edge(b, c));
            out.extend([ac, ad, bd, ac, bd, bc]);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::test_support::RecordingProgress;
    use crate::algorithm::NoProgress;
    use crate::dataset::tests::linear_data_set;
    use crate::geom::Transform;

    #[test]
    fn surface_vertices_carry_the_isovalue() {
        let ds = linear_data_set(Transform::identity());
        let algorithm = Isosurface::new(0);
        let params = algorithm
            .seed_parameters(&ds, Point3::new(1.0, 1.0, 1.0))
            .expect("seed inside");
        let geometry = algorithm
            .extract(&ds, params.as_ref(), &mut NoProgress)
            .expect("extract");
        let Geometry::Triangles { vertices, triangles } = geometry else {
            panic!("expected triangles");
        };
        assert!(!triangles.is_empty());
        for p in vertices {
            let value = p.x + 2.0 * p.y + 3.0 * p.z;
            assert!((value - 6.0).abs() < 1e-9, "vertex {p:?} has value {value}");
        }
    }

    #[test]
    fn stopping_early_keeps_partial_surface() {
        let ds = linear_data_set(Transform::identity());
        let algorithm = Isosurface::new(0);
        let params = algorithm
            .seed_parameters(&ds, Point3::new(1.0, 1.0, 1.0))
            .expect("seed inside");
        let mut progress = RecordingProgress {
            stop_after: Some(1),
            ..RecordingProgress::default()
        };
        let partial = algorithm
            .extract(&ds, params.as_ref(), &mut progress)
            .expect("extract");
        let full = algorithm
            .extract(&ds, params.as_ref(), &mut NoProgress)
            .expect("extract");
        assert_eq!(progress.reports, vec![50.0]);
        assert!(partial.primitive_count() < full.primitive_count());
    }

    #[test]
    fn seed_outside_domain_yields_no_parameters() {
        let ds = linear_data_set(Transform::identity());
        assert!(Isosurface::new(0)
            .seed_parameters(&ds, Point3::new(5.0, 0.0, 0.0))
            .is_none());
    }

    #[test]
    fn ascii_parameters_use_variable_names() {
        let ds = linear_data_set(Transform::identity());
        let variables = VariableManager::new(&ds);
        let params = IsosurfaceParameters {
            variable: 0,
            isovalue: 2.5,
            seed: Point3::new(0.5, 0.25, 1.0),
        };
        let mut text = Vec::new();
        params.write_ascii(&mut text, &variables).expect("write");
        let text = String::from_utf8(text).expect("utf8");
        assert_eq!(text, "scalarVariable Linear\nisovalue 2.5\nseedPoint 0.5 0.25 1\n");

        let mut copy = IsosurfaceParameters {
            variable: 9,
            isovalue: 0.0,
            seed: Point3::ORIGIN,
        };
        copy.read_ascii(&mut TokenReader::new(text.as_bytes()), &variables)
            .expect("read");
        assert_eq!(copy, params);
    }
}
