//! # Icosphere Subdivision
//!
//! Subdivided icosahedron used as an alternative ray direction source. Each
//! subdivision splits every face into four. Splitting keeps indices stable:
//! the first V vertices of level k+1 are exactly level k's vertices, and new
//! vertices are appended in edge order. A refinement pass can therefore
//! restart with the first N directions of a finer level and extend later.

use glam::Vec3;

/// Triangle face referencing vertices and edges
#[derive(Debug, Clone, Copy)]
struct Face {
    vertices: [u16; 3],
    edges: [u16; 3],
}

/// Edge between two vertices
#[derive(Debug, Clone, Copy)]
struct Edge {
    vertices: [u16; 2],
}

/// Subdivided icosahedron on the unit sphere
#[derive(Debug, Clone)]
pub struct IcoSphere {
    vertices: Vec<Vec3>,
    edges: Vec<Edge>,
    faces: Vec<Face>,
    opening_angle: f32,
}

impl IcoSphere {
    /// Base icosahedron: 12 vertices, 30 edges, 20 faces
    pub fn base_level() -> Self {
        let vertices = vec![
            Vec3::new(-0.000000, -1.000000, -0.000000),
            Vec3::new(-0.723600, -0.447215, 0.525720),
            Vec3::new(0.276385, -0.447215, 0.850640),
            Vec3::new(0.894425, -0.447215, -0.000000),
            Vec3::new(0.276385, -0.447215, -0.850640),
            Vec3::new(-0.723600, -0.447215, -0.525720),
            Vec3::new(-0.276385, 0.447215, 0.850640),
            Vec3::new(0.723600, 0.447215, 0.525720),
            Vec3::new(0.723600, 0.447215, -0.525720),
            Vec3::new(-0.276385, 0.447215, -0.850640),
            Vec3::new(-0.894425, 0.447215, -0.000000),
            Vec3::new(-0.000000, 1.000000, -0.000000),
        ];

        let edge_table: [[u16; 2]; 30] = [
            [2, 0],
            [0, 1],
            [1, 2],
            [5, 1],
            [0, 5],
            [3, 0],
            [2, 3],
            [4, 0],
            [3, 4],
            [4, 5],
            [10, 1],
            [5, 10],
            [6, 2],
            [1, 6],
            [7, 3],
            [2, 7],
            [8, 4],
            [3, 8],
            [9, 5],
            [4, 9],
            [10, 6],
            [6, 7],
            [7, 8],
            [8, 9],
            [9, 10],
            [11, 6],
            [10, 11],
            [11, 7],
            [11, 8],
            [11, 9],
        ];
        let edges = edge_table.iter().map(|v| Edge { vertices: *v }).collect();

        let face_table: [[u16; 6]; 20] = [
            [0, 2, 1, 0, 2, 1],
            [1, 5, 0, 3, 4, 1],
            [0, 3, 2, 5, 6, 0],
            [0, 4, 3, 7, 8, 5],
            [0, 5, 4, 4, 9, 7],
            [1, 10, 5, 10, 11, 3],
            [2, 6, 1, 12, 13, 2],
            [3, 7, 2, 14, 15, 6],
            [4, 8, 3, 16, 17, 8],
            [5, 9, 4, 18, 19, 9],
            [1, 6, 10, 13, 20, 10],
            [2, 7, 6, 15, 21, 12],
            [3, 8, 7, 17, 22, 14],
            [4, 9, 8, 19, 23, 16],
            [5, 10, 9, 11, 24, 18],
            [6, 11, 10, 25, 26, 20],
            [7, 11, 6, 27, 25, 21],
            [8, 11, 7, 28, 27, 22],
            [9, 11, 8, 29, 28, 23],
            [10, 11, 9, 26, 29, 24],
        ];
        let faces = face_table
            .iter()
            .map(|f| Face {
                vertices: [f[0], f[1], f[2]],
                edges: [f[3], f[4], f[5]],
            })
            .collect();

        let mut ico = Self {
            vertices,
            edges,
            faces,
            opening_angle: 0.0,
        };
        ico.calculate_opening_angle();
        ico
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Beam opening angle matching the vertex spacing, radians
    pub fn opening_angle(&self) -> f32 {
        self.opening_angle
    }

    /// Split every face into four
    ///
    /// Edge midpoints are appended after the existing vertices, one batch per
    /// original edge, so earlier levels keep their indices and the new
    /// vertices do not cluster around single faces.
    pub fn subdivide(&self) -> Self {
        let old_edge_count = self.edges.len();
        let old_face_count = self.faces.len();
        let old_vertex_count = self.vertices.len();

        let mut vertices = Vec::with_capacity(old_vertex_count + old_edge_count);
        vertices.extend_from_slice(&self.vertices);

        let mut edges = vec![
            Edge { vertices: [0, 0] };
            old_edge_count * 2 + old_face_count * 3
        ];
        let mut faces = vec![
            Face {
                vertices: [0, 0, 0],
                edges: [0, 0, 0],
            };
            old_face_count * 4
        ];

        // split every edge in the middle
        let oe = old_edge_count;
        for (i, edge) in self.edges.iter().enumerate() {
            let v1 = edge.vertices[0] as usize;
            let v2 = edge.vertices[1] as usize;
            let vn = (old_vertex_count + i) as u16;

            vertices.push((self.vertices[v1] + self.vertices[v2]).normalize());

            edges[i] = Edge {
                vertices: [edge.vertices[0], vn],
            };
            edges[oe + i] = Edge {
                vertices: [vn, edge.vertices[1]],
            };
        }

        // new per-face edges follow the split edges
        let oef1 = oe + old_edge_count;
        let oef2 = oef1 + old_face_count;
        let oef3 = oef2 + old_face_count;
        let of1 = old_face_count;
        let of2 = of1 + old_face_count;
        let of3 = of2 + old_face_count;

        for (i, face) in self.faces.iter().enumerate() {
            let [e1, e2, e3] = face.edges.map(|e| e as usize);
            let [v1, v2, v3] = face.vertices;

            let flip1 = v1 == self.edges[e1].vertices[1];
            let flip2 = v2 == self.edges[e2].vertices[1];
            let flip3 = v3 == self.edges[e3].vertices[1];

            let e1a = if flip1 { oe + e1 } else { e1 } as u16;
            let e1b = if flip1 { e1 } else { oe + e1 } as u16;
            let e2a = if flip2 { oe + e2 } else { e2 } as u16;
            let e2b = if flip2 { e2 } else { oe + e2 } as u16;
            let e3a = if flip3 { oe + e3 } else { e3 } as u16;
            let e3b = if flip3 { e3 } else { oe + e3 } as u16;

            let nef1 = oef1 + i;
            let nef2 = oef2 + i;
            let nef3 = oef3 + i;
            let nv1 = (old_vertex_count + e1) as u16;
            let nv2 = (old_vertex_count + e2) as u16;
            let nv3 = (old_vertex_count + e3) as u16;

            edges[nef1] = Edge {
                vertices: [nv1, nv2],
            };
            edges[nef2] = Edge {
                vertices: [nv2, nv3],
            };
            edges[nef3] = Edge {
                vertices: [nv3, nv1],
            };

            let nef1 = nef1 as u16;
            let nef2 = nef2 as u16;
            let nef3 = nef3 as u16;

            faces[i] = Face {
                vertices: [v1, nv1, nv3],
                edges: [e1a, nef3, e3b],
            };
            faces[of1 + i] = Face {
                vertices: [v2, nv2, nv1],
                edges: [e2a, nef1, e1b],
            };
            faces[of2 + i] = Face {
                vertices: [v3, nv3, nv2],
                edges: [e3a, nef2, e2b],
            };
            faces[of3 + i] = Face {
                vertices: [nv1, nv2, nv3],
                edges: [nef1, nef2, nef3],
            };
        }

        let mut ico = Self {
            vertices,
            edges,
            faces,
            opening_angle: 0.0,
        };
        ico.calculate_opening_angle();
        ico
    }

    /// Icosphere subdivided `level` times; level 0 is the base icosahedron
    pub fn at_level(level: u32) -> Self {
        let mut ico = Self::base_level();
        for _ in 0..level {
            ico = ico.subdivide();
        }
        ico
    }

    fn calculate_opening_angle(&mut self) {
        let edge = &self.edges[0];
        let radius = (self.vertices[edge.vertices[1] as usize]
            - self.vertices[edge.vertices[0] as usize])
            .length()
            * 0.5;
        self.opening_angle = radius.atan() * 2.0;
    }
}
