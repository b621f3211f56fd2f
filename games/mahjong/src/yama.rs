//! The deck (yama): a shuffled 136-tile wall (fewer in 3-player, per
//! `SyncMahjongOption`), split at construction into a live wall that players
//! draw from and four dora/uradora indicator pairs handed to the
//! [`crate::dora::DorasManager`].

use crate::tile::{BaseTile, Tile};
use rand::seq::SliceRandom;
use rand::Rng;

/// The standard 34-face wall: four copies of every tile, minus the faces a
/// 3-player table removes (2m-8m, per the common 三人麻雀 sanma rule the
/// source's `k_dora_sign_to_dora<3>` table implies by special-casing 1m/9m).
fn build_faces(three_player: bool) -> Vec<BaseTile> {
    let mut faces = Vec::new();
    for suit_start in [0u8, 9, 18] {
        for rank in 1..=9u8 {
            if three_player && suit_start == 0 && (2..=8).contains(&rank) {
                continue;
            }
            faces.push(BaseTile(suit_start + rank - 1));
        }
    }
    for honor in 27..=33u8 {
        faces.push(BaseTile(honor));
    }
    faces
}

pub struct Yama {
    tiles: Vec<Tile>,
    idx: usize,
}

impl Yama {
    /// Builds and shuffles a fresh wall, reserving the last 14 tiles as the
    /// dead wall (never drawn) and the four dora/uradora pairs from within
    /// it. One tile per number suit is randomly promoted to a red five.
    pub fn new(rng: &mut impl Rng, three_player: bool) -> (Self, [(Tile, Tile); 4]) {
        let faces = build_faces(three_player);
        let mut tiles: Vec<Tile> = Vec::with_capacity(faces.len() * 4);
        for face in faces {
            for _ in 0..4 {
                tiles.push(Tile::plain(face));
            }
        }
        tiles.shuffle(rng);
        for suit_start in [0u8, 9, 18] {
            let five = BaseTile(suit_start + 4);
            if let Some(t) = tiles.iter_mut().find(|t| t.base == five && !t.red_dora) {
                t.red_dora = true;
            }
        }

        let dead_wall_start = tiles.len() - 14;
        let mut doras = [(Tile::plain(BaseTile(0)), Tile::plain(BaseTile(0))); 4];
        for (i, pair) in doras.iter_mut().enumerate() {
            *pair = (
                tiles[dead_wall_start + i * 2],
                tiles[dead_wall_start + i * 2 + 1],
            );
        }
        let live = tiles[..dead_wall_start].to_vec();
        (Yama { tiles: live, idx: 0 }, doras)
    }

    pub fn draw(&mut self) -> Option<Tile> {
        let tile = self.tiles.get(self.idx).copied()?;
        self.idx += 1;
        Some(tile)
    }

    pub fn is_exhausted(&self) -> bool {
        self.idx >= self.tiles.len()
    }

    /// True for the tile about to be drawn being the last of the live wall
    /// (haitei/houtei — the `IS_LAST_TILE` counter flag).
    pub fn is_last_tile(&self) -> bool {
        self.idx + 1 >= self.tiles.len()
    }

    pub fn remaining(&self) -> usize {
        self.tiles.len().saturating_sub(self.idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn four_player_wall_has_136_minus_14_live_tiles() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        let (yama, _doras) = Yama::new(&mut rng, false);
        assert_eq!(yama.remaining(), 136 - 14);
    }

    #[test]
    fn three_player_wall_drops_2m_through_8m() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        let (yama, _doras) = Yama::new(&mut rng, true);
        // 34 faces - 7 dropped man faces = 27 faces, times 4 copies, minus dead wall.
        assert_eq!(yama.remaining(), 27 * 4 - 14);
    }

    #[test]
    fn exactly_one_red_five_per_suit() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(2);
        let (mut yama, _doras) = Yama::new(&mut rng, false);
        let mut reds = 0;
        while let Some(t) = yama.draw() {
            if t.red_dora {
                reds += 1;
            }
        }
        assert_eq!(reds, 3);
    }
}
