//! Tile representation: suit, rank, red-dora and transparency flags (§3
//! "Mahjong-specific entities"), plus the ordered multiset used for hand and
//! river display.

use std::cmp::Ordering;
use std::fmt;

/// One of the 34 distinct tile faces, numerically coded the way the source
/// engine codes them (`0..=8` = 1m-9m, `9..=17` = 1p-9p, `18..=26` = 1s-9s,
/// `27..=33` = East, South, West, North, Haku, Hatsu, Chun) so that "next
/// tile in suit" and "same suit" are cheap arithmetic rather than a match.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct BaseTile(pub u8);

pub const EAST: BaseTile = BaseTile(27);
pub const SOUTH: BaseTile = BaseTile(28);
pub const WEST: BaseTile = BaseTile(29);
pub const NORTH: BaseTile = BaseTile(30);
pub const HAKU: BaseTile = BaseTile(31);
pub const HATSU: BaseTile = BaseTile(32);
pub const CHUN: BaseTile = BaseTile(33);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Suit {
    Man,
    Pin,
    Sou,
    Honor,
}

impl BaseTile {
    pub fn man(rank: u8) -> Self {
        BaseTile(rank - 1)
    }
    pub fn pin(rank: u8) -> Self {
        BaseTile(9 + rank - 1)
    }
    pub fn sou(rank: u8) -> Self {
        BaseTile(18 + rank - 1)
    }

    pub fn suit(self) -> Suit {
        match self.0 {
            0..=8 => Suit::Man,
            9..=17 => Suit::Pin,
            18..=26 => Suit::Sou,
            _ => Suit::Honor,
        }
    }

    /// 1-indexed rank within the suit (1..=9 for number suits, 1..=7 for
    /// honors in East/South/West/North/Haku/Hatsu/Chun order).
    pub fn rank(self) -> u8 {
        match self.suit() {
            Suit::Man => self.0 + 1,
            Suit::Pin => self.0 - 9 + 1,
            Suit::Sou => self.0 - 18 + 1,
            Suit::Honor => self.0 - 27 + 1,
        }
    }

    pub fn is_honor(self) -> bool {
        self.suit() == Suit::Honor
    }

    pub fn is_terminal(self) -> bool {
        matches!(self.suit(), Suit::Man | Suit::Pin | Suit::Sou) && (self.rank() == 1 || self.rank() == 9)
    }

    /// Terminal or honor — 幺九牌, the tile class 九种九牌 and tanyao count over.
    pub fn is_yaochuu(self) -> bool {
        self.is_honor() || self.is_terminal()
    }

    pub fn is_wind(self) -> bool {
        matches!(self, EAST | SOUTH | WEST | NORTH)
    }

    pub fn is_dragon(self) -> bool {
        matches!(self, HAKU | HATSU | CHUN)
    }

    /// The tile a dora indicator of `self` actually points to: the next rank
    /// in the same number suit (wrapping 9 -> 1), the next wind in turn order
    /// (wrapping North -> East), or the next dragon in haku/hatsu/chun order
    /// (wrapping chun -> haku).
    pub fn dora_for_indicator(self) -> BaseTile {
        match self.suit() {
            Suit::Man | Suit::Pin | Suit::Sou => {
                let rank0 = self.0 % 9;
                BaseTile(self.0 - rank0 + (rank0 + 1) % 9)
            }
            Suit::Honor if self.is_wind() => {
                let idx = self.0 - 27;
                BaseTile(27 + (idx + 1) % 4)
            }
            Suit::Honor => {
                let idx = self.0 - 31;
                BaseTile(31 + (idx + 1) % 3)
            }
        }
    }

    /// Parses the `<rank><suit>` notation `Display` renders (`m`/`p`/`s` for
    /// the number suits, `z` for honors 1-7 in East/South/West/North/Haku/
    /// Hatsu/Chun order, `0` as the rank digit for a red five). Returns the
    /// face plus whether the `0` spelling was used.
    pub fn parse(text: &str) -> Option<(BaseTile, bool)> {
        let bytes = text.as_bytes();
        if bytes.len() != 2 {
            return None;
        }
        let digit = (bytes[0] as char).to_digit(10)?;
        match bytes[1] {
            b'm' | b'p' | b's' => {
                let rank = if digit == 0 { 5 } else { digit as u8 };
                if !(1..=9).contains(&rank) {
                    return None;
                }
                let base = match bytes[1] {
                    b'm' => BaseTile::man(rank),
                    b'p' => BaseTile::pin(rank),
                    _ => BaseTile::sou(rank),
                };
                Some((base, digit == 0))
            }
            b'z' => {
                if !(1..=7).contains(&digit) {
                    return None;
                }
                Some((BaseTile(27 + digit as u8 - 1), false))
            }
            _ => None,
        }
    }
}

impl fmt::Display for BaseTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suit() {
            Suit::Man => write!(f, "{}m", self.rank()),
            Suit::Pin => write!(f, "{}p", self.rank()),
            Suit::Sou => write!(f, "{}s", self.rank()),
            Suit::Honor => write!(
                f,
                "{}",
                ["东", "南", "西", "北", "白", "发", "中"][self.rank() as usize - 1]
            ),
        }
    }
}

/// A physical tile: its face plus whether it is a red five (aka dora) or
/// dealt face-up (transparent, per the source's `toumei` concept used when
/// presenting an opened hand).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Tile {
    pub base: BaseTile,
    pub red_dora: bool,
    pub transparent: bool,
}

impl Tile {
    pub fn plain(base: BaseTile) -> Self {
        Tile {
            base,
            red_dora: false,
            transparent: false,
        }
    }

    pub fn red(base: BaseTile) -> Self {
        Tile {
            base,
            red_dora: true,
            transparent: false,
        }
    }

    /// A red five is only valid for the 5 of each number suit.
    pub fn is_red_five_candidate(base: BaseTile) -> bool {
        matches!(base.suit(), Suit::Man | Suit::Pin | Suit::Sou) && base.rank() == 5
    }
}

impl PartialOrd for Tile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.base.cmp(&other.base)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.red_dora {
            write!(f, "0{}", &self.base.to_string()[1..])
        } else {
            write!(f, "{}", self.base)
        }
    }
}

/// A multiset of tiles kept sorted by rank for display, the way the source's
/// `TileSet` renders a hand left to right.
#[derive(Clone, Default, Debug)]
pub struct TileSet(Vec<Tile>);

impl TileSet {
    pub fn new() -> Self {
        TileSet(Vec::new())
    }

    pub fn insert(&mut self, tile: Tile) {
        let pos = self.0.partition_point(|t| *t < tile);
        self.0.insert(pos, tile);
    }

    /// Removes one tile matching `base` (preferring a red-dora match when
    /// `prefer_red` is set), returning it if found.
    pub fn remove_one(&mut self, base: BaseTile, prefer_red: bool) -> Option<Tile> {
        let idx = if prefer_red {
            self.0
                .iter()
                .position(|t| t.base == base && t.red_dora)
                .or_else(|| self.0.iter().position(|t| t.base == base))
        } else {
            self.0.iter().position(|t| t.base == base)
        }?;
        Some(self.0.remove(idx))
    }

    pub fn count(&self, base: BaseTile) -> usize {
        self.0.iter().filter(|t| t.base == base).count()
    }

    pub fn contains(&self, base: BaseTile) -> bool {
        self.count(base) > 0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Tile] {
        &self.0
    }

    /// Distinct yaochuu (terminal/honor) faces present, for the 九种九牌 check.
    pub fn distinct_yaochuu(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        for t in &self.0 {
            if t.base.is_yaochuu() {
                seen.insert(t.base);
            }
        }
        seen.len()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Wind {
    East,
    South,
    West,
    North,
}

impl Default for Wind {
    fn default() -> Self {
        Wind::East
    }
}

impl Wind {
    pub fn to_tile(self) -> BaseTile {
        match self {
            Wind::East => EAST,
            Wind::South => SOUTH,
            Wind::West => WEST,
            Wind::North => NORTH,
        }
    }

    pub fn seat_for(index: usize, seat_count: usize) -> Self {
        match index % seat_count {
            0 => Wind::East,
            1 => Wind::South,
            2 => Wind::West,
            _ => Wind::North,
        }
    }
}
