use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Quickselect rounds before falling back to a deterministic selection.
const MAX_SELECT_DEPTH: usize = 35;

struct Node {
    point: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
}

/// Search state of a single nearest neighbor query.
///
/// Each worker owns its own scratch; the tree itself is never mutated by a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Index of the best point found so far.
    pub index: usize,
    /// Squared distance from the query to that point.
    pub distance_squared: f64,
}

/// A 3d tree over a fixed point set.
///
/// Nodes split at the median along the x, y and z axes in turn. The tree is read-only after
/// construction and can be shared by reference across threads.
pub struct KdTree {
    points: Vec<DVec3>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl KdTree {
    /// Build a tree over a copy of `points`.
    ///
    /// Medians are found with a randomized quickselect seeded with a fixed value, so the
    /// layout is deterministic for a given input.
    pub fn new(points: &[DVec3]) -> Self {
        let mut indices: Vec<usize> = (0..points.len()).collect();
        let mut nodes = Vec::with_capacity(points.len());
        let mut rng = StdRng::seed_from_u64(0);
        let root = build_node(points, &mut indices, 0, &mut nodes, &mut rng);
        Self {
            points: points.to_vec(),
            nodes,
            root,
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the tree holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The indexed points, in their original order.
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    /// Find the exact nearest point to `query`.
    ///
    /// # Returns
    ///
    /// The index of the nearest point and its Euclidean distance, `None` for an empty tree.
    pub fn find_nearest(&self, query: DVec3) -> Option<(usize, f64)> {
        let root = self.root?;
        let mut scratch = Nearest {
            index: self.nodes[root].point,
            distance_squared: f64::INFINITY,
        };
        self.search(root, query, &mut scratch);
        Some((scratch.index, scratch.distance_squared.sqrt()))
    }

    /// Find the nearest point, starting the search from a candidate index.
    ///
    /// A good guess (typically the answer of the previous, nearby query) lets the descent prune
    /// most of the tree. An out of range guess is ignored.
    pub fn find_nearest_with_guess(&self, query: DVec3, guess: usize) -> Option<usize> {
        let root = self.root?;
        let mut scratch = match self.points.get(guess) {
            Some(p) => Nearest {
                index: guess,
                distance_squared: p.distance_squared(query),
            },
            None => Nearest {
                index: self.nodes[root].point,
                distance_squared: f64::INFINITY,
            },
        };
        self.search(root, query, &mut scratch);
        Some(scratch.index)
    }

    /// Refine a caller-owned search state with the points of this tree.
    pub fn refine(&self, query: DVec3, scratch: &mut Nearest) {
        if let Some(root) = self.root {
            self.search(root, query, scratch);
        }
    }

    fn search(&self, node: usize, query: DVec3, best: &mut Nearest) {
        let node = &self.nodes[node];
        let point = self.points[node.point];
        let diff = query[node.axis] - point[node.axis];

        // descend into the side of the splitting plane that holds the query first
        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(child) = near {
            self.search(child, query, best);
        }

        if diff * diff < best.distance_squared {
            let d = point.distance_squared(query);
            if d < best.distance_squared {
                best.index = node.point;
                best.distance_squared = d;
            }
            if let Some(child) = far {
                self.search(child, query, best);
            }
        }
    }
}

fn build_node(
    points: &[DVec3],
    indices: &mut [usize],
    axis: usize,
    nodes: &mut Vec<Node>,
    rng: &mut StdRng,
) -> Option<usize> {
    if indices.is_empty() {
        return None;
    }
    let mid = indices.len() / 2;
    select_median(points, indices, mid, axis, rng);

    let (left, rest) = indices.split_at_mut(mid);
    let (median, right) = rest.split_first_mut()?;

    let id = nodes.len();
    nodes.push(Node {
        point: *median,
        axis,
        left: None,
        right: None,
    });

    let next_axis = (axis + 1) % 3;
    let left = build_node(points, left, next_axis, nodes, rng);
    let right = build_node(points, right, next_axis, nodes, rng);
    nodes[id].left = left;
    nodes[id].right = right;
    Some(id)
}

/// Reorder `indices` so that position `k` holds the median along `axis`, smaller keys before it
/// and larger keys after it.
fn select_median(points: &[DVec3], indices: &mut [usize], k: usize, axis: usize, rng: &mut StdRng) {
    let key = |i: usize| points[i][axis];
    let (mut lo, mut hi) = (0, indices.len());

    for _ in 0..MAX_SELECT_DEPTH {
        if hi - lo <= 1 {
            return;
        }
        let pivot = key(indices[rng.random_range(lo..hi)]);

        // three-way partition so runs of duplicates always shrink the window
        let (mut lt, mut i, mut gt) = (lo, lo, hi);
        while i < gt {
            let v = key(indices[i]);
            if v < pivot {
                indices.swap(lt, i);
                lt += 1;
                i += 1;
            } else if v > pivot {
                gt -= 1;
                indices.swap(i, gt);
            } else {
                i += 1;
            }
        }

        if k < lt {
            hi = lt;
        } else if k >= gt {
            lo = gt;
        } else {
            return;
        }
    }

    log::debug!("median selection hit the depth cap on {} points", hi - lo);
    indices[lo..hi].select_nth_unstable_by(k - lo, |&a, &b| key(a).total_cmp(&key(b)));
}
