#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum Easing {
    Linear,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
    /// CSS `cubic-bezier(x1, y1, x2, y2)` semantics.
    CubicBezier(f64, f64, f64, f64),
}

impl Easing {
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);

        match self {
            Easing::Linear => t,
            Easing::EaseIn => t * t,
            Easing::EaseOut => t * (2.0 - t),
            Easing::EaseInOut if t < 0.5 => 2.0 * t * t,
            Easing::EaseInOut => -1.0 + (4.0 - 2.0 * t) * t,
            Easing::CubicBezier(x1, y1, x2, y2) => {
                let curve_t = solve_bezier_t(t, x1, x2);
                sample_bezier(curve_t, y1, y2)
            }
        }
    }
}

impl std::str::FromStr for Easing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Easing::Linear),
            "ease-in" => Ok(Easing::EaseIn),
            "ease-out" => Ok(Easing::EaseOut),
            "ease-in-out" => Ok(Easing::EaseInOut),
            other => Err(format!("unknown easing `{other}`")),
        }
    }
}

/// Newton iterations on the x polynomial.
fn solve_bezier_t(x: f64, x1: f64, x2: f64) -> f64 {
    let mut t = x;

    for _ in 0..8 {
        let residual = sample_bezier(t, x1, x2) - x;

        if residual.abs() < 1e-9 {
            return t;
        }

        let slope = bezier_derivative(t, x1, x2);

        if slope.abs() < 1e-9 {
            break;
        }

        t -= residual / slope;
    }

    t
}

/// Cubic bezier through (0,0) and (1,1).
fn sample_bezier(t: f64, p1: f64, p2: f64) -> f64 {
    let mt = 1.0 - t;

    3.0 * mt * mt * t * p1 + 3.0 * mt * t * t * p2 + t * t * t
}

fn bezier_derivative(t: f64, p1: f64, p2: f64) -> f64 {
    let mt = 1.0 - t;

    3.0 * mt * mt * p1 + 6.0 * mt * t * (p2 - p1) + 3.0 * t * t * (1.0 - p2)
}
