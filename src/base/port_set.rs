use std::fmt;

/// Index of a router (or endpoint) port. Compass ports come first, followed by the
/// local endpoint ports starting at [`LOCAL_PORT_START`].
pub type PortId = usize;

pub const NORTH_PORT: PortId = 0;
pub const SOUTH_PORT: PortId = 1;
pub const EAST_PORT: PortId = 2;
pub const WEST_PORT: PortId = 3;
pub const LOCAL_PORT_START: PortId = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn port(self) -> PortId {
        match self {
            Direction::North => NORTH_PORT,
            Direction::South => SOUTH_PORT,
            Direction::East => EAST_PORT,
            Direction::West => WEST_PORT,
        }
    }

    pub fn from_port(port: PortId) -> Option<Self> {
        match port {
            NORTH_PORT => Some(Direction::North),
            SOUTH_PORT => Some(Direction::South),
            EAST_PORT => Some(Direction::East),
            WEST_PORT => Some(Direction::West),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    /// Mesh coordinate offset of the neighbour in this direction.
    pub fn offset(self) -> (i64, i64) {
        match self {
            Direction::North => (0, 1),
            Direction::South => (0, -1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }
}

/// Human readable port name, used for stats keys and status dumps.
pub fn port_name(port: PortId) -> String {
    match Direction::from_port(port) {
        Some(Direction::North) => "north".to_string(),
        Some(Direction::South) => "south".to_string(),
        Some(Direction::East) => "east".to_string(),
        Some(Direction::West) => "west".to_string(),
        None => format!("local{}", port - LOCAL_PORT_START),
    }
}

/// Small set of port ids. Routers have at most a few dozen ports, so a single word is
/// enough.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct PortSet(u64);

impl PortSet {
    pub const CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, port: PortId) {
        assert!(port < Self::CAPACITY, "port {} out of range", port);
        self.0 |= 1u64 << port;
    }

    pub fn remove(&mut self, port: PortId) {
        if port < Self::CAPACITY {
            self.0 &= !(1u64 << port);
        }
    }

    pub fn contains(&self, port: PortId) -> bool {
        port < Self::CAPACITY && self.0 & (1u64 << port) != 0
    }

    pub fn contains_dir(&self, dir: Direction) -> bool {
        self.contains(dir.port())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = PortId> + '_ {
        (0..Self::CAPACITY).filter(move |p| self.contains(*p))
    }
}

impl fmt::Debug for PortSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(port_name)).finish()
    }
}

impl FromIterator<PortId> for PortSet {
    fn from_iter<I: IntoIterator<Item = PortId>>(iter: I) -> Self {
        let mut set = PortSet::new();
        iter.into_iter().for_each(|p| set.insert(p));
        set
    }
}
