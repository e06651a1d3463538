/// Return statistics used for volatility classification

/// Simple percentage returns between consecutive prices
pub fn calculate_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

/// Sample standard deviation (n - 1)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(variance.sqrt())
}

/// Blend of return deviation and ATR%, both annualized with sqrt(365)
pub fn annualized_volatility(prices: &[f64], atr_pct: f64) -> f64 {
    let annualizer = 365f64.sqrt();
    let return_vol = std_dev(&calculate_returns(prices)).unwrap_or(0.0) * annualizer;
    (return_vol + atr_pct * annualizer) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns() {
        let returns = calculate_returns(&[100.0, 110.0, 99.0]);
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_std_dev() {
        assert!(std_dev(&[1.0]).is_none());
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.138).abs() < 0.001);
    }

    #[test]
    fn test_flat_prices_have_zero_volatility() {
        assert_eq!(annualized_volatility(&[100.0; 50], 0.0), 0.0);
    }
}
