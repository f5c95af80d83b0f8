use client_core::BoardDisplay;
use shared::domain::Player;

const START_FEN_PLACEMENT: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR";

/// Text diagram of the board as the operator would see it, white or black
/// at the bottom. `None` when the position is not a FEN piece placement.
pub fn diagram(board: &BoardDisplay) -> Option<String> {
    let placement = match board.position.as_str() {
        client_core::prediction::START_POSITION => START_FEN_PLACEMENT,
        position => position.split_whitespace().next()?,
    };

    let mut ranks = Vec::with_capacity(8);
    for rank in placement.split('/') {
        let mut squares = Vec::with_capacity(8);
        for symbol in rank.chars() {
            match symbol {
                '1'..='8' => {
                    let empty = symbol.to_digit(10)? as usize;
                    squares.extend(std::iter::repeat('.').take(empty));
                }
                'p' | 'n' | 'b' | 'r' | 'q' | 'k' | 'P' | 'N' | 'B' | 'R' | 'Q' | 'K' => {
                    squares.push(symbol)
                }
                _ => return None,
            }
        }
        if squares.len() != 8 {
            return None;
        }
        ranks.push(squares);
    }
    if ranks.len() != 8 {
        return None;
    }

    let mut labels: Vec<char> = ('a'..='h').collect();
    let mut rank_numbers: Vec<u8> = (1..=8).rev().collect();
    if board.orientation == Player::Black {
        ranks.reverse();
        ranks.iter_mut().for_each(|rank| rank.reverse());
        labels.reverse();
        rank_numbers.reverse();
    }

    let mut out = String::new();
    for (squares, number) in ranks.iter().zip(rank_numbers) {
        out.push_str(&number.to_string());
        for square in squares {
            out.push(' ');
            out.push(*square);
        }
        out.push('\n');
    }
    out.push(' ');
    for label in labels {
        out.push(' ');
        out.push(label);
    }
    Some(out)
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
