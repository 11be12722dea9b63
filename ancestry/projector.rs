// ========================================================================================
//
//                         Rigid 3-D projection of distance triangles
//
// ========================================================================================
//
// A triangle of vertex distances (E, F, A) and a subject are moved so that F sits at
// the origin, rotated so that A lies on the x-axis and E in the xy-plane, and then
// moved so that F lands on a fixed anchor. The result is a frame that does not
// depend on the absolute scale of the input distances. Barycentric weights of the
// subject are solved in that plane.

use crate::types::{GenoDistance, NUM_VTX_POPS, SpatialPoint};

/// Where the F vertex is placed after the transform.
pub const CANONICAL_F_ANCHOR: SpatialPoint = SpatialPoint::new(1.05, 1.10, 0.00);

/// Below this absolute determinant the triangle is treated as collinear.
const DEGENERATE_DETERMINANT: f64 = 1e-12;

/// The rigid transform fitted to one triangle, reusable for any number of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransform {
    origin: SpatialPoint,
    about_z: f64,
    about_y: f64,
    about_x: f64,
}

impl FrameTransform {
    /// Fits the transform to the E, F and A vertices (already in point space).
    pub fn fit(e: SpatialPoint, f: SpatialPoint, a: SpatialPoint) -> Self {
        let origin = f;
        let a0 = translate(a, -origin.x, -origin.y, -origin.z);
        let e0 = translate(e, -origin.x, -origin.y, -origin.z);

        let about_z = -a0.y.atan2(a0.x);
        let a1 = rotate_z(a0, about_z);
        let e1 = rotate_z(e0, about_z);

        let about_y = a1.z.atan2(a1.x);
        let e2 = rotate_y(e1, about_y);

        let about_x = e2.y.atan2(e2.z) - std::f64::consts::FRAC_PI_2;

        Self {
            origin,
            about_z,
            about_y,
            about_x,
        }
    }

    pub fn apply(&self, p: SpatialPoint) -> SpatialPoint {
        let p = translate(p, -self.origin.x, -self.origin.y, -self.origin.z);
        let p = rotate_z(p, self.about_z);
        let p = rotate_y(p, self.about_y);
        let p = rotate_x(p, self.about_x);
        // F is at the origin here, so one shift places it on the anchor.
        translate(
            p,
            CANONICAL_F_ANCHOR.x,
            CANONICAL_F_ANCHOR.y,
            CANONICAL_F_ANCHOR.z,
        )
    }
}

#[inline]
fn translate(p: SpatialPoint, dx: f64, dy: f64, dz: f64) -> SpatialPoint {
    SpatialPoint::new(p.x + dx, p.y + dy, p.z + dz)
}

#[inline]
fn rotate_x(p: SpatialPoint, theta: f64) -> SpatialPoint {
    let (sin, cos) = theta.sin_cos();
    SpatialPoint::new(p.x, p.y * cos - p.z * sin, p.y * sin + p.z * cos)
}

#[inline]
fn rotate_y(p: SpatialPoint, theta: f64) -> SpatialPoint {
    let (sin, cos) = theta.sin_cos();
    SpatialPoint::new(p.x * cos + p.z * sin, p.y, -p.x * sin + p.z * cos)
}

#[inline]
fn rotate_z(p: SpatialPoint, theta: f64) -> SpatialPoint {
    let (sin, cos) = theta.sin_cos();
    SpatialPoint::new(p.x * cos - p.y * sin, p.x * sin + p.y * cos, p.z)
}

/// The E, F and A vertices after the transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedTriangle {
    pub e: SpatialPoint,
    pub f: SpatialPoint,
    pub a: SpatialPoint,
}

impl ProjectedTriangle {
    /// Weights of `p` against the triangle's xy projection, or `None` when the
    /// triangle is degenerate.
    pub fn barycentric(&self, p: SpatialPoint) -> Option<BarycentricWeights> {
        let (x1, y1) = (self.e.x, self.e.y);
        let (x2, y2) = (self.f.x, self.f.y);
        let (x3, y3) = (self.a.x, self.a.y);

        let det = (y2 - y3) * (x1 - x3) + (x3 - x2) * (y1 - y3);
        if !det.is_finite() || det.abs() < DEGENERATE_DETERMINANT {
            return None;
        }
        let e = ((y2 - y3) * (p.x - x3) + (x3 - x2) * (p.y - y3)) / det;
        let f = ((y3 - y1) * (p.x - x3) + (x1 - x3) * (p.y - y3)) / det;
        Some(BarycentricWeights { e, f, a: 1.0 - e - f })
    }

    /// The xy point with the given weights inside this triangle.
    pub fn interpolate(&self, w: &BarycentricWeights) -> (f64, f64) {
        (
            w.e * self.e.x + w.f * self.f.x + w.a * self.a.x,
            w.e * self.e.y + w.f * self.f.y + w.a * self.a.y,
        )
    }
}

/// A triangle together with one subject, all in the transformed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub triangle: ProjectedTriangle,
    pub subject: SpatialPoint,
}

/// Transforms the vertex triangle (in E, F, A order) on its own.
pub fn project_triangle(vertices: &[GenoDistance; NUM_VTX_POPS]) -> ProjectedTriangle {
    let [e, f, a] = vertices.map(GenoDistance::to_point);
    let transform = FrameTransform::fit(e, f, a);
    ProjectedTriangle {
        e: transform.apply(e),
        f: transform.apply(f),
        a: transform.apply(a),
    }
}

/// Transforms a vertex triangle (in E, F, A order) and a subject with the transform
/// fitted to the triangle.
pub fn project(vertices: &[GenoDistance; NUM_VTX_POPS], subject: GenoDistance) -> Projection {
    let [e, f, a] = vertices.map(GenoDistance::to_point);
    let transform = FrameTransform::fit(e, f, a);
    Projection {
        triangle: ProjectedTriangle {
            e: transform.apply(e),
            f: transform.apply(f),
            a: transform.apply(a),
        },
        subject: transform.apply(subject.to_point()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarycentricWeights {
    pub e: f64,
    pub f: f64,
    pub a: f64,
}

impl BarycentricWeights {
    /// Negative weights are clipped to zero and the rest rescaled to sum to 100.
    pub fn percentages(&self) -> AncestryPercentages {
        let e = self.e.max(0.0);
        let f = self.f.max(0.0);
        let a = self.a.max(0.0);
        let total = e + f + a;
        if !(total > 0.0) {
            return AncestryPercentages::default();
        }
        AncestryPercentages {
            e: e * 100.0 / total,
            f: f * 100.0 / total,
            a: a * 100.0 / total,
        }
    }
}

/// European, African and East Asian shares in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AncestryPercentages {
    pub e: f64,
    pub f: f64,
    pub a: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_triangle(rng: &mut StdRng) -> [GenoDistance; 3] {
        [0, 1, 2].map(|_| {
            GenoDistance::new(
                rng.gen_range(0.5..2.0),
                rng.gen_range(0.5..2.0),
                rng.gen_range(0.5..2.0),
            )
        })
    }

    #[test]
    fn f_lands_on_the_anchor() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let triangle = project_triangle(&random_triangle(&mut rng));
            assert_eq!(triangle.f, CANONICAL_F_ANCHOR);
        }
    }

    #[test]
    fn transform_is_rigid_and_flattens_the_triangle() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let vertices = random_triangle(&mut rng);
            let [e, f, a] = vertices.map(GenoDistance::to_point);
            let projected = project_triangle(&vertices);

            assert_abs_diff_eq!(e.distance(&f), projected.e.distance(&projected.f), epsilon = 1e-9);
            assert_abs_diff_eq!(e.distance(&a), projected.e.distance(&projected.a), epsilon = 1e-9);
            assert_abs_diff_eq!(f.distance(&a), projected.f.distance(&projected.a), epsilon = 1e-9);

            // A on the anchor's x line, everything in the z = 0 plane.
            assert_abs_diff_eq!(projected.a.y, CANONICAL_F_ANCHOR.y, epsilon = 1e-9);
            assert_abs_diff_eq!(projected.a.z, 0.0, epsilon = 1e-9);
            assert_abs_diff_eq!(projected.e.z, 0.0, epsilon = 1e-9);
            assert!(projected.e.y > CANONICAL_F_ANCHOR.y);
        }
    }

    #[test]
    fn subject_keeps_its_distances_to_the_vertices() {
        let vertices = [
            GenoDistance::new(1.2, 1.9, 1.7),
            GenoDistance::new(1.8, 1.1, 1.9),
            GenoDistance::new(1.7, 1.8, 1.0),
        ];
        let subject = GenoDistance::new(1.4, 1.6, 1.5);
        let projection = project(&vertices, subject);
        let s = subject.to_point();
        let e = vertices[0].to_point();
        assert_abs_diff_eq!(
            s.distance(&e),
            projection.subject.distance(&projection.triangle.e),
            epsilon = 1e-9
        );
        assert_eq!(projection.triangle, project_triangle(&vertices));
    }

    #[test]
    fn weights_sum_to_one_and_pick_out_vertices() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let vertices = random_triangle(&mut rng);
            let subject = GenoDistance::new(
                rng.gen_range(0.5..2.0),
                rng.gen_range(0.5..2.0),
                rng.gen_range(0.5..2.0),
            );
            let projection = project(&vertices, subject);
            let Some(w) = projection.triangle.barycentric(projection.subject) else {
                continue;
            };
            assert_abs_diff_eq!(w.e + w.f + w.a, 1.0, epsilon = 1e-9);
        }

        let vertices = [
            GenoDistance::new(1.2, 1.9, 1.7),
            GenoDistance::new(1.8, 1.1, 1.9),
            GenoDistance::new(1.7, 1.8, 1.0),
        ];
        let projection = project(&vertices, vertices[1]);
        let w = projection.triangle.barycentric(projection.subject).unwrap();
        assert_abs_diff_eq!(w.e, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w.f, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(w.a, 0.0, epsilon = 1e-9);

        let (x, y) = projection.triangle.interpolate(&w);
        assert_abs_diff_eq!(x, CANONICAL_F_ANCHOR.x, epsilon = 1e-9);
        assert_abs_diff_eq!(y, CANONICAL_F_ANCHOR.y, epsilon = 1e-9);
    }

    #[test]
    fn collinear_triangles_have_no_weights() {
        let vertices = [
            GenoDistance::new(1.0, 1.0, 1.0),
            GenoDistance::new(2.0, 2.0, 2.0),
            GenoDistance::new(3.0, 3.0, 3.0),
        ];
        let triangle = project_triangle(&vertices);
        assert!(triangle.barycentric(triangle.e).is_none());
    }

    #[test]
    fn percentages_clip_and_renormalise() {
        let w = BarycentricWeights {
            e: 0.6,
            f: -0.2,
            a: 0.6,
        };
        let pct = w.percentages();
        assert_abs_diff_eq!(pct.e, 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pct.f, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pct.a, 50.0, epsilon = 1e-12);
    }
}
