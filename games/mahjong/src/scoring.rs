//! Hand completeness, yaku and fu/han scoring.
//!
//! The source engine delegates this entirely to an external conventional
//! yaku library (§4.8: "uses a conventional mahjong yaku library"); that
//! library isn't part of the retrieved corpus, so this module is a
//! self-contained scorer built from the standard riichi scoring tables
//! rather than a translation of unavailable code. It implements the subset
//! of yaku and fu rules needed to produce believable, internally consistent
//! scores and to honor the flags §4.8 names (tsumo, chankan, ippatsu,
//! haitei/houtei, yakuman suppression, kita-as-dora).

use crate::tile::{BaseTile, Suit, Tile, Wind, HAKU};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Group {
    Pair(BaseTile),
    Triplet(BaseTile),
    Sequence(BaseTile), // lowest tile of the run
}

/// Flags describing the context of a winning hand, passed in the way the
/// source passes a `GetCounterFlag` bitset.
#[derive(Clone, Copy, Default, Debug)]
pub struct WinContext {
    pub tsumo: bool,
    pub rob_kan: bool,
    pub is_last_tile: bool,
    pub riichi: bool,
    pub ippatsu: bool,
    pub double_riichi: bool,
    pub closed: bool,
    pub seat_wind: Wind,
    pub round_wind: Wind,
    pub is_dealer: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Yaku {
    Riichi,
    DoubleRiichi,
    Ippatsu,
    MenzenTsumo,
    Pinfu,
    Tanyao,
    Yakuhai,
    Toitoi,
    Honitsu,
    Chinitsu,
    Houtei,
    Haitei,
    Chankan,
    NagashiMangan,
    // Yakuman.
    KokushiMusou,
    Suuankou,
    Daisangen,
}

impl Yaku {
    pub fn han(self, closed: bool) -> u32 {
        match self {
            Yaku::Riichi => 1,
            Yaku::DoubleRiichi => 2,
            Yaku::Ippatsu => 1,
            Yaku::MenzenTsumo => 1,
            Yaku::Pinfu => 1,
            Yaku::Tanyao => 1,
            Yaku::Yakuhai => 1,
            Yaku::Toitoi => 2,
            Yaku::Honitsu => {
                if closed {
                    3
                } else {
                    2
                }
            }
            Yaku::Chinitsu => {
                if closed {
                    6
                } else {
                    5
                }
            }
            Yaku::Houtei | Yaku::Haitei | Yaku::Chankan => 1,
            Yaku::NagashiMangan => 5,
            Yaku::KokushiMusou | Yaku::Suuankou | Yaku::Daisangen => 13,
        }
    }

    pub fn is_yakuman(self) -> bool {
        self.han(true) >= 13
    }
}

/// A completed decomposition: four groups (melds) plus a pair, drawn from
/// both the concealed hand and any fixed open melds.
pub struct Decomposition {
    pub groups: Vec<Group>,
    pub is_chiitoi: bool,
    pub is_kokushi: bool,
}

/// Tries to decompose `concealed` (including the winning tile) into
/// `required_melds` melds plus one pair. `concealed` excludes tiles already
/// locked into open furu.
pub fn decompose_standard(concealed: &[BaseTile], required_melds: usize) -> Option<Vec<Group>> {
    let mut counts = [0u8; 34];
    for t in concealed {
        counts[t.0 as usize] += 1;
    }
    let mut groups = Vec::new();
    if search(&mut counts, required_melds, true, &mut groups) {
        Some(groups)
    } else {
        None
    }
}

fn search(counts: &mut [u8; 34], melds_left: usize, need_pair: bool, out: &mut Vec<Group>) -> bool {
    let Some(first) = counts.iter().position(|&c| c > 0) else {
        return melds_left == 0 && !need_pair;
    };
    // Pair.
    if need_pair && counts[first] >= 2 {
        counts[first] -= 2;
        out.push(Group::Pair(BaseTile(first as u8)));
        if search(counts, melds_left, false, out) {
            return true;
        }
        out.pop();
        counts[first] += 2;
    }
    if melds_left == 0 {
        return false;
    }
    // Triplet.
    if counts[first] >= 3 {
        counts[first] -= 3;
        out.push(Group::Triplet(BaseTile(first as u8)));
        if search(counts, melds_left - 1, need_pair, out) {
            return true;
        }
        out.pop();
        counts[first] += 3;
    }
    // Sequence (number suits only).
    let base = BaseTile(first as u8);
    if matches!(base.suit(), Suit::Man | Suit::Pin | Suit::Sou) && base.rank() <= 7 {
        let b1 = first + 1;
        let b2 = first + 2;
        if counts[b1] > 0 && counts[b2] > 0 {
            counts[first] -= 1;
            counts[b1] -= 1;
            counts[b2] -= 1;
            out.push(Group::Sequence(base));
            if search(counts, melds_left - 1, need_pair, out) {
                return true;
            }
            out.pop();
            counts[first] += 1;
            counts[b1] += 1;
            counts[b2] += 1;
        }
    }
    false
}

pub fn is_chiitoitsu(concealed: &[BaseTile]) -> bool {
    let mut counts = [0u8; 34];
    for t in concealed {
        counts[t.0 as usize] += 1;
    }
    concealed.len() == 14 && counts.iter().filter(|&&c| c == 2).count() == 7
}

pub fn is_kokushi(concealed: &[BaseTile]) -> bool {
    if concealed.len() != 14 {
        return false;
    }
    let mut counts = [0u8; 34];
    for t in concealed {
        if !t.is_yaochuu() {
            return false;
        }
        counts[t.0 as usize] += 1;
    }
    let distinct = counts.iter().filter(|&&c| c > 0).count();
    let has_pair = counts.iter().any(|&c| c == 2);
    distinct == 13 && has_pair
}

/// Result of one winning hand: which yaku applied, their combined han, the
/// fu total, and the raw point delta this produces (computed by the caller,
/// which knows dealer/seat-count context for payment splitting).
#[derive(Clone, Debug)]
pub struct FuResult {
    pub yaku: Vec<Yaku>,
    pub han: u32,
    pub fu: u32,
    pub dora: u32,
    pub uradora: u32,
    pub aka_dora: u32,
    pub kita_dora: u32,
    pub base_points: i64,
}

fn group_fu(group: Group, is_open_call: bool) -> u32 {
    match group {
        Group::Pair(b) if b.is_dragon() => 2,
        Group::Pair(_) => 0,
        Group::Sequence(_) => 0,
        Group::Triplet(b) => {
            let base = if b.is_yaochuu() { 8 } else { 4 };
            if is_open_call {
                base / 2
            } else {
                base
            }
        }
    }
}

/// Assembles yaku + fu from a decomposition and context. `open_melds` counts
/// fixed furu already removed from `groups` consideration (every furu meld is
/// non-concealed by construction, so its fu halves relative to an equivalent
/// hand-formed triplet — callers that also need kan fu should add it
/// themselves since this function only sees groups formed from the closed
/// part of the hand).
pub fn score_standard_hand(groups: &[Group], ctx: WinContext, win_tile: BaseTile, open_melds: usize) -> FuResult {
    let mut yaku = Vec::new();
    let mut base_fu: u32 = 20;

    let all_sequences = groups.iter().all(|g| matches!(g, Group::Sequence(_) | Group::Pair(_))) && open_melds == 0;
    let all_triplets = groups.iter().all(|g| matches!(g, Group::Triplet(_))) && open_melds == 0;
    let no_terminals = groups.iter().all(|g| match g {
        Group::Pair(b) | Group::Triplet(b) => !b.is_yaochuu(),
        Group::Sequence(b) => !b.is_yaochuu() && !BaseTile(b.0 + 2).is_yaochuu(),
    });
    let one_suit: Option<Suit> = groups.iter().find_map(|g| match g {
        Group::Pair(b) | Group::Triplet(b) | Group::Sequence(b) if !b.is_honor() => Some(b.suit()),
        _ => None,
    });
    let has_honor = groups.iter().any(|g| match g {
        Group::Pair(b) | Group::Triplet(b) => b.is_honor(),
        Group::Sequence(_) => false,
    });
    let pure_one_suit = one_suit.is_some()
        && groups
            .iter()
            .all(|g| matches!(g, Group::Pair(b) | Group::Triplet(b) | Group::Sequence(b) if b.is_honor() || Some(b.suit()) == one_suit));

    if ctx.double_riichi {
        yaku.push(Yaku::DoubleRiichi);
    } else if ctx.riichi {
        yaku.push(Yaku::Riichi);
    }
    if ctx.riichi && ctx.ippatsu {
        yaku.push(Yaku::Ippatsu);
    }
    if ctx.tsumo && ctx.closed {
        yaku.push(Yaku::MenzenTsumo);
    }
    if ctx.closed && all_sequences && open_melds == 0 && !ctx.tsumo {
        if let Some(Group::Pair(p)) = groups.iter().find(|g| matches!(g, Group::Pair(_))) {
            if !p.is_yaochuu() {
                yaku.push(Yaku::Pinfu);
            }
        }
    }
    if no_terminals {
        yaku.push(Yaku::Tanyao);
    }
    for g in groups {
        if let Group::Triplet(b) = g {
            if *b == ctx.seat_wind.to_tile() || *b == ctx.round_wind.to_tile() || b.is_dragon() {
                yaku.push(Yaku::Yakuhai);
            }
        }
    }
    if all_triplets {
        yaku.push(Yaku::Toitoi);
    }
    if pure_one_suit {
        if has_honor {
            yaku.push(Yaku::Honitsu);
        } else {
            yaku.push(Yaku::Chinitsu);
        }
    }
    if ctx.rob_kan {
        yaku.push(Yaku::Chankan);
    }
    if ctx.is_last_tile {
        yaku.push(if ctx.tsumo { Yaku::Haitei } else { Yaku::Houtei });
    }
    if open_melds == 0 && groups.iter().filter(|g| matches!(g, Group::Triplet(_))).count() + open_melds == 4 {
        yaku.push(Yaku::Suuankou);
    }
    if groups
        .iter()
        .filter(|g| matches!(g, Group::Triplet(b) if b.is_dragon()))
        .count()
        == 3
    {
        yaku.push(Yaku::Daisangen);
    }

    for g in groups {
        base_fu += group_fu(*g, false);
    }
    if !ctx.tsumo && ctx.closed {
        base_fu += 10; // menzen ron bonus
    }
    if ctx.tsumo {
        base_fu += 2;
    }
    let _ = win_tile;

    let has_yakuman = yaku.iter().any(|y| y.is_yakuman());
    if has_yakuman {
        yaku.retain(|y| y.is_yakuman());
    }
    let han: u32 = yaku.iter().map(|y| y.han(ctx.closed)).sum();
    let fu = if base_fu % 10 == 0 { base_fu } else { base_fu + (10 - base_fu % 10) };

    FuResult {
        yaku,
        han,
        fu,
        dora: 0,
        uradora: 0,
        aka_dora: 0,
        kita_dora: 0,
        base_points: base_points(fu, han),
    }
}

/// Standard base-point table (the "20fu 1han = 20 base points, doubling per
/// han" ladder), capped at mangan and above.
pub fn base_points(fu: u32, han: u32) -> i64 {
    if han >= 13 {
        return 8000;
    }
    if han >= 11 {
        return 6000;
    }
    if han >= 8 {
        return 4000;
    }
    if han >= 6 {
        return 3000;
    }
    let raw = fu as i64 * 2i64.pow(2 + han);
    if han >= 5 || raw >= 2000 {
        2000
    } else {
        raw
    }
}

fn round_up_100(n: i64) -> i64 {
    if n % 100 == 0 {
        n
    } else {
        n + (100 - n % 100)
    }
}

/// Per-loser payment for a tsumo win (every non-winner pays this, dealer
/// seats pay/receive double).
pub fn tsumo_payment(base: i64, payer_is_dealer: bool) -> i64 {
    round_up_100(base * if payer_is_dealer { 2 } else { 1 })
}

/// Total payment the discarder owes for a ron (split among co-winners by the
/// caller, per the §9 open-question resolution for multi-ron).
pub fn ron_payment(base: i64, winner_is_dealer: bool) -> i64 {
    round_up_100(base * if winner_is_dealer { 6 } else { 4 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::BaseTile;

    #[test]
    fn decomposes_a_simple_standard_hand() {
        // 123m 456p 789s 11z 11z(triplet) as 4 melds + pair: 123m 456p 789s EE WW? simplify
        let tiles = vec![
            BaseTile::man(1), BaseTile::man(2), BaseTile::man(3),
            BaseTile::pin(4), BaseTile::pin(5), BaseTile::pin(6),
            BaseTile::sou(7), BaseTile::sou(8), BaseTile::sou(9),
            crate::tile::EAST, crate::tile::EAST, crate::tile::EAST,
            crate::tile::HAKU, crate::tile::HAKU,
        ];
        let groups = decompose_standard(&tiles, 4).unwrap();
        assert_eq!(groups.len(), 5);
    }

    #[test]
    fn rejects_an_incomplete_hand() {
        let tiles = vec![BaseTile::man(1), BaseTile::man(2), BaseTile::man(4)];
        assert!(decompose_standard(&tiles, 1).is_none());
    }

    #[test]
    fn kokushi_requires_all_thirteen_types_plus_a_pair() {
        let mut tiles = vec![
            BaseTile::man(1), BaseTile::man(9), BaseTile::sou(1), BaseTile::sou(9),
            BaseTile::pin(1), BaseTile::pin(9), HAKU, crate::tile::HATSU, crate::tile::CHUN,
            crate::tile::EAST, crate::tile::SOUTH, crate::tile::WEST, crate::tile::NORTH,
        ];
        tiles.push(BaseTile::man(1));
        assert!(is_kokushi(&tiles));
    }

    #[test]
    fn tanyao_hand_scores_no_yakuhai() {
        let groups = vec![
            Group::Sequence(BaseTile::man(2)),
            Group::Sequence(BaseTile::pin(3)),
            Group::Sequence(BaseTile::sou(4)),
            Group::Triplet(BaseTile::man(5)),
            Group::Pair(BaseTile::pin(6)),
        ];
        let ctx = WinContext {
            tsumo: false,
            closed: true,
            seat_wind: Wind::East,
            round_wind: Wind::East,
            is_dealer: true,
            ..Default::default()
        };
        let result = score_standard_hand(&groups, ctx, BaseTile::man(2), 0);
        assert!(result.yaku.contains(&Yaku::Tanyao));
        assert!(result.han >= 1);
    }
}
