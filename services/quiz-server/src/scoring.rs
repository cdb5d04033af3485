//! Pure scoring and ranking logic (C7). No I/O — the same shape as the
//! teacher's `announcer.rs`, unit-testable without a database or socket.

use std::collections::HashMap;
use uuid::Uuid;

use crate::models::QuizResult;

/// Clamp a client-reported elapsed time into `[0, time_limit_ms]`, per
/// §4.6 step 4: the server's own elapsed time is authoritative, the
/// client's timestamp only orders answers within the window.
#[must_use]
pub fn effective_response_time_ms(client_elapsed_ms: i64, time_limit_ms: i64) -> i64 {
    client_elapsed_ms.clamp(0, time_limit_ms)
}

/// `score = point_value * (1 - effective_rt_ms/time_limit_ms)`, rounded,
/// floored at `ceil(point_value * 0.1)` for a correct answer; zero otherwise.
#[must_use]
pub fn score_for_answer(is_correct: bool, point_value: i32, effective_rt_ms: i64, time_limit_ms: i64) -> i32 {
    if !is_correct || time_limit_ms <= 0 {
        return 0;
    }
    let ratio = 1.0 - (effective_rt_ms as f64 / time_limit_ms as f64);
    let raw = (point_value as f64 * ratio).round() as i32;
    let floor = (point_value as f64 * 0.1).ceil() as i32;
    raw.max(floor)
}

/// Dense ranking (§4.7, invariant 5): sort by (score desc, total response
/// time asc, user_id asc); ties share a rank, the next distinct score gets
/// `previous + 1`. Mutates `rank` in place on each `QuizResult`.
pub fn dense_rank(results: &mut [QuizResult], total_response_time_ms: &HashMap<Uuid, i64>) {
    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| {
                let a_rt = total_response_time_ms.get(&a.user_id).copied().unwrap_or(0);
                let b_rt = total_response_time_ms.get(&b.user_id).copied().unwrap_or(0);
                a_rt.cmp(&b_rt)
            })
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    let mut rank = 0;
    let mut prev_score: Option<i64> = None;
    for result in results.iter_mut() {
        match prev_score {
            Some(s) if s == result.score => {}
            _ => rank += 1,
        }
        prev_score = Some(result.score);
        result.rank = rank;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(user_id: Uuid, score: i64) -> QuizResult {
        QuizResult {
            user_id,
            quiz_id: Uuid::nil(),
            username: "u".to_owned(),
            score,
            correct_answers: 0,
            total_questions: 1,
            rank: 0,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn s1_fast_correct_answer_scores_eighty_of_a_hundred() {
        // S1: option 2000ms into a 10s window, point_value 100.
        let rt = effective_response_time_ms(2000, 10_000);
        let score = score_for_answer(true, 100, rt, 10_000);
        assert_eq!(score, 80);
    }

    #[test]
    fn wrong_answer_scores_zero() {
        assert_eq!(score_for_answer(false, 100, 5000, 10_000), 0);
    }

    #[test]
    fn no_answer_scores_zero() {
        assert_eq!(score_for_answer(false, 100, 10_000, 10_000), 0);
    }

    #[test]
    fn correct_answer_never_scores_below_the_ten_percent_floor() {
        // Answered right at the wire: ratio ~0, would round to 0 without the floor.
        let score = score_for_answer(true, 100, 9999, 10_000);
        assert_eq!(score, 10);
    }

    #[test]
    fn effective_response_time_clamps_negative_and_overlong_client_timestamps() {
        assert_eq!(effective_response_time_ms(-500, 10_000), 0);
        assert_eq!(effective_response_time_ms(50_000, 10_000), 10_000);
    }

    #[test]
    fn dense_rank_gives_ties_the_same_rank_and_next_distinct_score_prev_plus_one() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let u3 = Uuid::new_v4();
        let mut results = vec![result(u1, 80), result(u2, 80), result(u3, 50)];
        dense_rank(&mut results, &HashMap::new());

        let by_id: HashMap<Uuid, i32> = results.iter().map(|r| (r.user_id, r.rank)).collect();
        assert_eq!(by_id[&u1], 1);
        assert_eq!(by_id[&u2], 1);
        assert_eq!(by_id[&u3], 2);
    }

    #[test]
    fn dense_rank_breaks_ties_by_total_response_time_then_user_id() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let mut rt = HashMap::new();
        rt.insert(u1, 5000);
        rt.insert(u2, 3000);
        let mut results = vec![result(u1, 100), result(u2, 100)];
        dense_rank(&mut results, &rt);

        assert_eq!(results[0].user_id, u2);
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].user_id, u1);
        assert_eq!(results[1].rank, 1);
    }

    #[test]
    fn s1_two_player_final_ranks() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let mut results = vec![result(u1, 80), result(u2, 0)];
        dense_rank(&mut results, &HashMap::new());
        let by_id: HashMap<Uuid, i32> = results.iter().map(|r| (r.user_id, r.rank)).collect();
        assert_eq!(by_id[&u1], 1);
        assert_eq!(by_id[&u2], 2);
    }
}
