//! Dimension-order routing over a mesh with a one-router halo.
//!
//! Coordinates include the halo: interior routers occupy `1..=x_size - 2` by
//! `1..=y_size - 2`, and an endpoint attached to a boundary compass port is addressed as if
//! it sat on the halo router just outside that port.

use crate::base::port_set::{
    Direction, PortId, EAST_PORT, LOCAL_PORT_START, NORTH_PORT, SOUTH_PORT, WEST_PORT,
};
use crate::noc::event::{MeshCoord, Nid};

/// Mesh dimensions as discovered by bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGeometry {
    pub x_size: i64,
    pub y_size: i64,
    pub local_ports: usize,
}

impl MeshGeometry {
    pub fn new(x_size: i64, y_size: i64, local_ports: usize) -> Self {
        Self {
            x_size,
            y_size,
            local_ports,
        }
    }

    /// Sparse id of the endpoint on `local_index` of the router at `coord`.
    pub fn endpoint_id(&self, coord: MeshCoord, local_index: usize) -> Nid {
        let rtr = (coord.y * self.x_size + coord.x) as Nid;
        rtr * self.local_ports as Nid + local_index as Nid
    }

    /// Maps a sparse endpoint id to the router that delivers it and the port it leaves on.
    /// Halo ids are clamped onto the boundary router, leaving through the compass port
    /// that faces the halo.
    pub fn locate(&self, sparse: Nid) -> (MeshCoord, PortId) {
        let local_ports = self.local_ports as Nid;
        let rtr = sparse / local_ports;
        let mut x = (rtr % self.x_size as Nid) as i64;
        let mut y = (rtr / self.x_size as Nid) as i64;

        let egress = if x == 0 {
            x = 1;
            WEST_PORT
        } else if x == self.x_size - 1 {
            x = self.x_size - 2;
            EAST_PORT
        } else if y == 0 {
            y = 1;
            SOUTH_PORT
        } else if y == self.y_size - 1 {
            y = self.y_size - 2;
            NORTH_PORT
        } else {
            LOCAL_PORT_START + (sparse - rtr * local_ports) as PortId
        };
        (MeshCoord::new(x, y), egress)
    }

    pub fn is_interior(&self, coord: MeshCoord) -> bool {
        (1..=self.x_size - 2).contains(&coord.x) && (1..=self.y_size - 2).contains(&coord.y)
    }

    /// Router hops from `from` to the far (northeast) interior corner.
    pub fn distance_to_far_corner(&self, from: MeshCoord) -> i64 {
        (self.x_size - 2 - from.x) + (self.y_size - 2 - from.y)
    }
}

/// Output port at `here` for a packet bound to `dest`, leaving on `egress` once it arrives.
pub fn next_port(here: MeshCoord, dest: MeshCoord, egress: PortId, y_first: bool) -> PortId {
    let x_step = if dest.x > here.x {
        Some(EAST_PORT)
    } else if dest.x < here.x {
        Some(WEST_PORT)
    } else {
        None
    };
    let y_step = if dest.y > here.y {
        Some(NORTH_PORT)
    } else if dest.y < here.y {
        Some(SOUTH_PORT)
    } else {
        None
    };

    let step = if y_first {
        y_step.or(x_step)
    } else {
        x_step.or(y_step)
    };
    step.unwrap_or(egress)
}

/// Directions a broadcast copy is forwarded in, given where it came from (`None` for a
/// locally attached endpoint). Rows fan out east and west, columns north and south, so
/// every router sees exactly one copy.
pub fn broadcast_directions(from: Option<Direction>) -> &'static [Direction] {
    match from {
        None => &Direction::ALL,
        Some(Direction::West) => &[Direction::East, Direction::North, Direction::South],
        Some(Direction::East) => &[Direction::West, Direction::North, Direction::South],
        Some(Direction::South) => &[Direction::North],
        Some(Direction::North) => &[Direction::South],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(coord: MeshCoord, port: PortId) -> MeshCoord {
        let (dx, dy) = Direction::from_port(port).map_or((0, 0), Direction::offset);
        MeshCoord::new(coord.x + dx, coord.y + dy)
    }

    #[test]
    fn interior_ids_map_to_local_ports() {
        // 2x2 interior, two endpoints per router
        let geo = MeshGeometry::new(4, 4, 2);
        let coord = MeshCoord::new(2, 1);
        let id = geo.endpoint_id(coord, 1);
        assert_eq!(((4 + 2) * 2 + 1) as Nid, id);
        assert_eq!((coord, LOCAL_PORT_START + 1), geo.locate(id));
    }

    #[test]
    fn halo_ids_clamp_inward() {
        let geo = MeshGeometry::new(4, 4, 1);
        assert_eq!(
            (MeshCoord::new(1, 2), WEST_PORT),
            geo.locate(geo.endpoint_id(MeshCoord::new(0, 2), 0))
        );
        assert_eq!(
            (MeshCoord::new(2, 2), EAST_PORT),
            geo.locate(geo.endpoint_id(MeshCoord::new(3, 2), 0))
        );
        assert_eq!(
            (MeshCoord::new(2, 1), SOUTH_PORT),
            geo.locate(geo.endpoint_id(MeshCoord::new(2, 0), 0))
        );
        assert_eq!(
            (MeshCoord::new(1, 2), NORTH_PORT),
            geo.locate(geo.endpoint_id(MeshCoord::new(1, 3), 0))
        );
    }

    #[test]
    fn x_first_then_y() {
        let here = MeshCoord::new(1, 1);
        let dest = MeshCoord::new(2, 3);
        assert_eq!(EAST_PORT, next_port(here, dest, LOCAL_PORT_START, false));
        assert_eq!(NORTH_PORT, next_port(here, dest, LOCAL_PORT_START, true));
        assert_eq!(LOCAL_PORT_START, next_port(dest, dest, LOCAL_PORT_START, false));
    }

    /// Ids of every endpoint slot that can exist: interior local ports plus the halo cells
    /// next to a boundary router.
    fn reachable_ids(geo: &MeshGeometry) -> Vec<Nid> {
        let mut ids = Vec::new();
        for y in 0..geo.y_size {
            for x in 0..geo.x_size {
                let coord = MeshCoord::new(x, y);
                let halo_x = (x == 0 || x == geo.x_size - 1) && (1..=geo.y_size - 2).contains(&y);
                let halo_y = (y == 0 || y == geo.y_size - 1) && (1..=geo.x_size - 2).contains(&x);
                if geo.is_interior(coord) {
                    ids.extend((0..geo.local_ports).map(|i| geo.endpoint_id(coord, i)));
                } else if halo_x || halo_y {
                    ids.push(geo.endpoint_id(coord, 0));
                }
            }
        }
        ids
    }

    #[test]
    fn every_hop_gets_closer() {
        let geo = MeshGeometry::new(6, 5, 1);
        let ids = reachable_ids(&geo);
        assert_eq!(4 * 3 + 2 * 4 + 2 * 3, ids.len());
        for y_first in [false, true] {
            for &src in &ids {
                for &dst in &ids {
                    let (start, _) = geo.locate(src);
                    let (dest, egress) = geo.locate(dst);
                    let mut here = start;
                    let mut hops = 0;
                    loop {
                        let port = next_port(here, dest, egress, y_first);
                        if here == dest {
                            assert_eq!(egress, port);
                            break;
                        }
                        let next = step(here, port);
                        assert!(geo.is_interior(next), "left the mesh at {}", next);
                        assert!(next.manhattan(&dest) < here.manhattan(&dest));
                        here = next;
                        hops += 1;
                    }
                    assert_eq!(start.manhattan(&dest), hops);
                }
            }
        }
    }

    #[test]
    fn broadcast_covers_each_router_once() {
        let geo = MeshGeometry::new(5, 4, 1);
        let origin = MeshCoord::new(2, 1);
        let mut seen = std::collections::HashMap::new();
        let mut frontier = vec![(origin, None)];
        while let Some((here, from)) = frontier.pop() {
            *seen.entry(here).or_insert(0) += 1;
            for &dir in broadcast_directions(from) {
                let (dx, dy) = dir.offset();
                let next = MeshCoord::new(here.x + dx, here.y + dy);
                if geo.is_interior(next) {
                    frontier.push((next, Some(dir.opposite())));
                }
            }
        }
        assert_eq!(3 * 2, seen.len());
        assert!(seen.values().all(|&n| n == 1));
    }
}
