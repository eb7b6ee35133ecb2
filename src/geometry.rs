use super::*;

use parry3d_f64::math::Point;
use parry3d_f64::query::visitors::RayIntersectionsVisitor;
use parry3d_f64::query::Ray;
use parry3d_f64::shape::TriMesh;

/// Relative tolerance of the segment-triangle predicate.
const INTERSECT_EPS: f64 = 1E-12;

/// Fixed, slightly skew containment-ray direction. Axis-aligned rays graze
/// axis-aligned geometry too easily.
const CONTAINMENT_DIR: Vector = Vector { x: 0.26726124191242440, y: 0.53452248382484879, z: 0.80178372573727319 };

/// One triangle of a solid's surface, with its outward unit normal
/// (counter-clockwise winding seen from outside).
#[derive(Clone, Debug)]
pub struct Triangle {
    pub v0: Vector,
    pub v1: Vector,
    pub v2: Vector,
    pub normal: Vector,
    pub solid_index: usize,
}

/// A surface crossing of a line segment, at parametric distance `s` along it.
/// `entering` is true when the segment runs against the outward normal.
#[derive(Clone, Copy, Debug)]
pub struct Intersection {
    pub s: f64,
    pub triangle_index: usize,
    pub solid_index: usize,
    pub normal: Vector,
    pub entering: bool,
}

/// Triangle mesh of one solid, already in meters.
#[derive(Clone)]
pub struct SolidMesh {
    pub vertices: Vec<[f64; 3]>,
    pub indices: Vec<[u32; 3]>,
}

/// All solids' triangles behind one BVH, plus the material registry that maps
/// each triangle to a solid and its material. Immutable after construction,
/// queries are read-only and re-entrant.
pub struct Geometry {
    pub registry: MaterialRegistry,
    triangles: Vec<Triangle>,
    mesh: Option<TriMesh>,
    bbox_min: Vector,
    bbox_max: Vector,
}

impl Geometry {
    /// Builds the BVH from per-solid meshes; `meshes[i]` belongs to solid
    /// `i + 1` (solid 0 is the ambient default and has no surface).
    pub fn new(registry: MaterialRegistry, meshes: &[SolidMesh]) -> Result<Geometry, anyhow::Error> {
        if meshes.len() + 1 != registry.solids.len() {
            bail!("Input error: {} meshes for {} non-default solids.", meshes.len(), registry.solids.len() - 1);
        }

        let mut triangles = Vec::new();
        let mut vertices: Vec<Point<f64>> = Vec::new();
        let mut indices: Vec<[u32; 3]> = Vec::new();

        for (mesh_index, solid_mesh) in meshes.iter().enumerate() {
            let base = vertices.len() as u32;
            for v in &solid_mesh.vertices {
                vertices.push(Point::new(v[0], v[1], v[2]));
            }
            for tri in &solid_mesh.indices {
                for &i in tri {
                    if i as usize >= solid_mesh.vertices.len() {
                        bail!("Input error: triangle index {} out of range in solid {}.",
                            i, registry.solids[mesh_index + 1].name);
                    }
                }
                let v0 = Vector::from_array(solid_mesh.vertices[tri[0] as usize]);
                let v1 = Vector::from_array(solid_mesh.vertices[tri[1] as usize]);
                let v2 = Vector::from_array(solid_mesh.vertices[tri[2] as usize]);
                let normal = v1.sub(&v0).cross(&v2.sub(&v0));
                if normal.magnitude() == 0. {
                    bail!("Input error: degenerate triangle in solid {}.", registry.solids[mesh_index + 1].name);
                }
                triangles.push(Triangle {
                    v0,
                    v1,
                    v2,
                    normal: normal.normalized(),
                    solid_index: mesh_index + 1,
                });
                indices.push([base + tri[0], base + tri[1], base + tri[2]]);
            }
        }

        let (mesh, bbox_min, bbox_max) = if triangles.is_empty() {
            (None, Vector::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                Vector::new(f64::INFINITY, f64::INFINITY, f64::INFINITY))
        } else {
            let mesh = TriMesh::new(vertices, indices);
            let aabb = *mesh.qbvh().root_aabb();
            (Some(mesh),
                Vector::new(aabb.mins.x, aabb.mins.y, aabb.mins.z),
                Vector::new(aabb.maxs.x, aabb.maxs.y, aabb.maxs.z))
        };

        Ok(Geometry { registry, triangles, mesh, bbox_min, bbox_max })
    }

    pub fn triangle(&self, index: usize) -> &Triangle {
        &self.triangles[index]
    }

    /// Outer axis-aligned bounding box of all surfaces, padded by the push
    /// distance so surface points never count as outside.
    pub fn inside_bounding_box(&self, p: &Vector) -> bool {
        let pad = 1E-6;
        p.x >= self.bbox_min.x - pad && p.x <= self.bbox_max.x + pad
            && p.y >= self.bbox_min.y - pad && p.y <= self.bbox_max.y + pad
            && p.z >= self.bbox_min.z - pad && p.z <= self.bbox_max.z + pad
    }

    pub fn bounding_box(&self) -> (Vector, Vector) {
        (self.bbox_min, self.bbox_max)
    }

    /// Every intersection of the segment p1 -> p2 with active surfaces,
    /// ordered by increasing parametric distance s in [0, 1].
    pub fn first_intersections(&self, p1: &Vector, p2: &Vector, t: f64) -> Vec<Intersection> {
        let mesh = match &self.mesh {
            Some(mesh) => mesh,
            None => return vec![],
        };
        let direction = p2.sub(p1);
        if direction.magnitude_squared() == 0. {
            return vec![];
        }

        let ray = Ray::new(
            Point::new(p1.x, p1.y, p1.z),
            parry3d_f64::math::Vector::new(direction.x, direction.y, direction.z),
        );
        let mut candidates: Vec<u32> = Vec::new();
        {
            let mut record = |triangle_index: &u32| -> bool {
                candidates.push(*triangle_index);
                true
            };
            let mut visitor = RayIntersectionsVisitor::new(&ray, 1., &mut record);
            mesh.qbvh().traverse_depth_first(&mut visitor);
        }
        //BVH traversal order is not deterministic across layouts
        candidates.sort_unstable();

        let mut intersections = Vec::new();
        for triangle_index in candidates {
            let triangle = &self.triangles[triangle_index as usize];
            if !self.registry.solids[triangle.solid_index].is_active(t) {
                continue;
            }
            if let Some(s) = segment_triangle_intersection(p1, &direction, triangle) {
                intersections.push(Intersection {
                    s,
                    triangle_index: triangle_index as usize,
                    solid_index: triangle.solid_index,
                    normal: triangle.normal,
                    entering: direction.dot(&triangle.normal) < 0.,
                });
            }
        }
        intersections.sort_by(|a, b| {
            a.s.partial_cmp(&b.s)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.triangle_index.cmp(&b.triangle_index))
        });
        intersections
    }

    /// Parity containment test for a single solid.
    pub fn solid_contains(&self, solid_index: usize, p: &Vector, t: f64) -> bool {
        if solid_index == 0 {
            return true;
        }
        if !self.registry.solids[solid_index].is_active(t) {
            return false;
        }
        let diagonal = self.bbox_max.sub(&self.bbox_min).magnitude();
        if !diagonal.is_finite() {
            return false;
        }
        let p2 = p.add(&CONTAINMENT_DIR.scale(2. * diagonal.max(1.)));
        let crossings = self
            .first_intersections(p, &p2, t)
            .iter()
            .filter(|i| i.solid_index == solid_index)
            .count();
        crossings % 2 == 1
    }

    /// All active solids containing `p`, the particle's initial inside-set.
    /// Always includes the default solid 0.
    pub fn solids_containing(&self, p: &Vector, t: f64) -> Vec<usize> {
        let mut inside = vec![0];
        for solid_index in 1..self.registry.solids.len() {
            if self.solid_contains(solid_index, p, t) {
                inside.push(solid_index);
            }
        }
        inside
    }

    /// The currently active solid at `p`: the priority-maximal solid whose
    /// surface contains the point and whose time window is open.
    pub fn solid_at(&self, p: &Vector, t: f64) -> usize {
        self.solids_containing(p, t)
            .into_iter()
            .max_by_key(|&i| (self.registry.priority_of(i), i))
            .unwrap_or(0)
    }
}

/// Moeller-Trumbore segment-triangle test; returns the parametric distance s
/// along `direction` when the segment crosses the triangle.
fn segment_triangle_intersection(origin: &Vector, direction: &Vector, triangle: &Triangle) -> Option<f64> {
    let e1 = triangle.v1.sub(&triangle.v0);
    let e2 = triangle.v2.sub(&triangle.v0);
    let p = direction.cross(&e2);
    let det = e1.dot(&p);
    let scale = e1.magnitude() * e2.magnitude() * direction.magnitude();
    if det.abs() <= INTERSECT_EPS * scale {
        return None;
    }
    let inv_det = 1. / det;
    let tvec = origin.sub(&triangle.v0);
    let u = tvec.dot(&p) * inv_det;
    if !(-INTERSECT_EPS..=1. + INTERSECT_EPS).contains(&u) {
        return None;
    }
    let q = tvec.cross(&e1);
    let v = direction.dot(&q) * inv_det;
    if v < -INTERSECT_EPS || u + v > 1. + INTERSECT_EPS {
        return None;
    }
    let s = e2.dot(&q) * inv_det;
    if (0. ..=1.).contains(&s) {
        Some(s)
    } else {
        None
    }
}
