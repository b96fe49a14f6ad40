//! Validation of `geopoint`, `geotrace` and `geoshape` values.
//!
//! A point is `lat lng [altitude [accuracy]]`; traces and shapes are `;`-separated points.

fn coordinates(point: &str) -> Option<Vec<f64>> {
    let coords: Option<Vec<f64>> = point
        .split_whitespace()
        .map(|c| c.parse::<f64>().ok().filter(|n| n.is_finite()))
        .collect();
    coords.filter(|c| (2..=4).contains(&c.len()))
}

pub fn is_valid_point(value: &str) -> bool {
    coordinates(value).is_some_and(|c| {
        (-90.0..=90.0).contains(&c[0])
            && (-180.0..=180.0).contains(&c[1])
            && c.get(3).is_none_or(|accuracy| *accuracy >= 0.0)
    })
}

fn points(value: &str) -> Vec<&str> {
    value
        .split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn is_valid_trace(value: &str) -> bool {
    let points = points(value);
    points.len() >= 2 && points.iter().all(|p| is_valid_point(p))
}

/// At least four points, and the ring is closed.
pub fn is_valid_shape(value: &str) -> bool {
    let points = points(value);
    if points.len() < 4 || !points.iter().all(|p| is_valid_point(p)) {
        return false;
    }
    let first = coordinates(points[0]);
    let last = coordinates(points[points.len() - 1]);
    match (first, last) {
        (Some(f), Some(l)) => f[0] == l[0] && f[1] == l[1],
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geopoint() {
        assert!(is_valid_point("52.37 4.89"));
        assert!(is_valid_point("52.37 4.89 10 5"));
        assert!(!is_valid_point("91 4.89"));
        assert!(!is_valid_point("52.37 181"));
        assert!(!is_valid_point("52.37"));
        assert!(!is_valid_point("52.37 4.89 1 2 3"));
        assert!(!is_valid_point("52.37 4.89 1 -2"));
        assert!(!is_valid_point("a b"));
    }

    #[test]
    fn test_geotrace() {
        assert!(is_valid_trace("52 4;53 5"));
        assert!(is_valid_trace("52 4 0 0; 53 5 0 0;"));
        assert!(!is_valid_trace("52 4"));
        assert!(!is_valid_trace("52 4;x y"));
    }

    #[test]
    fn test_geoshape() {
        assert!(is_valid_shape("0 0;0 1;1 1;0 0"));
        assert!(!is_valid_shape("0 0;0 1;1 1;1 0"));
        assert!(!is_valid_shape("0 0;0 1;0 0"));
    }
}
