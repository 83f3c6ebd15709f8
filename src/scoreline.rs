//! Dixon–Coles adjusted Poisson score grids.

pub const MAX_GOALS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreProbs {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
    pub btts: f64,
    grid_total: [f64; 2 * MAX_GOALS as usize + 1],
}

impl ScoreProbs {
    /// P(total goals > line).
    pub fn over(&self, line: f64) -> f64 {
        self.grid_total
            .iter()
            .enumerate()
            .filter(|(goals, _)| *goals as f64 > line)
            .map(|(_, p)| p)
            .sum()
    }
}

pub fn score_grid(lambda_home: f64, lambda_away: f64, rho: f64) -> ScoreProbs {
    let mut p_home = 0.0_f64;
    let mut p_draw = 0.0_f64;
    let mut p_away = 0.0_f64;
    let mut p_btts = 0.0_f64;
    let mut totals = [0.0_f64; 2 * MAX_GOALS as usize + 1];

    for h in 0..=MAX_GOALS {
        for a in 0..=MAX_GOALS {
            let base = poisson_pmf(h, lambda_home) * poisson_pmf(a, lambda_away);
            let p = (base * dc_tau(h, a, lambda_home, lambda_away, rho)).max(0.0);
            if h > a {
                p_home += p;
            } else if h == a {
                p_draw += p;
            } else {
                p_away += p;
            }
            if h > 0 && a > 0 {
                p_btts += p;
            }
            totals[(h + a) as usize] += p;
        }
    }

    let sum = (p_home + p_draw + p_away).max(1e-12);
    for t in &mut totals {
        *t /= sum;
    }
    ScoreProbs {
        home: p_home / sum,
        draw: p_draw / sum,
        away: p_away / sum,
        btts: p_btts / sum,
        grid_total: totals,
    }
}

/// Grid search of rho so the mean-rate grid reproduces `draw_rate`.
pub fn fit_rho_to_draw_rate(lambda_home: f64, lambda_away: f64, draw_rate: f64) -> f64 {
    let target = draw_rate.clamp(0.05, 0.60);
    let mut best_rho = -0.10;
    let mut best_err = f64::INFINITY;

    for rho_steps in -25..=5 {
        let rho = rho_steps as f64 / 100.0;
        let p = score_grid(lambda_home, lambda_away, rho);
        let err = (p.draw - target).abs();
        if err < best_err {
            best_err = err;
            best_rho = rho;
        }
    }
    best_rho
}

fn dc_tau(home_goals: u32, away_goals: u32, lambda_home: f64, lambda_away: f64, rho: f64) -> f64 {
    match (home_goals, away_goals) {
        (0, 0) => 1.0 - lambda_home * lambda_away * rho,
        (0, 1) => 1.0 + lambda_home * rho,
        (1, 0) => 1.0 + lambda_away * rho,
        (1, 1) => 1.0 - rho,
        _ => 1.0,
    }
}

pub fn poisson_pmf(goals: u32, lambda: f64) -> f64 {
    let numer = lambda.powi(goals as i32) * (-lambda).exp();
    let denom = (1..=goals).fold(1.0_f64, |acc, k| acc * k as f64).max(1.0);
    numer / denom
}
