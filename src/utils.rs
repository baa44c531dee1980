//! Utility functions for the biolink-ble crate.

/// Resolution of an RR-interval tick in the Heart Rate Measurement
/// characteristic (1/1024 s).
pub const RR_TICKS_PER_SECOND: f64 = 1024.0;

/// Molar mass based factor converting mmol/L of glucose to mg/dL.
pub const GLUCOSE_MG_PER_DL_PER_MMOL_PER_L: f64 = 18.0182;

/// Convert a raw RR-interval value (1/1024 s ticks) to milliseconds.
///
/// # Example
///
/// ```
/// use biolink_ble::rr_ticks_to_millis;
///
/// assert!((rr_ticks_to_millis(1024) - 1000.0).abs() < 0.001);
/// ```
#[inline]
pub fn rr_ticks_to_millis(ticks: u16) -> f64 {
    ticks as f64 / RR_TICKS_PER_SECOND * 1000.0
}

/// Convert a glucose concentration from mmol/L to mg/dL.
///
/// # Example
///
/// ```
/// use biolink_ble::mmol_per_l_to_mg_per_dl;
///
/// let mg = mmol_per_l_to_mg_per_dl(5.5);
/// assert!((mg - 99.1).abs() < 0.01);
/// ```
#[inline]
pub fn mmol_per_l_to_mg_per_dl(mmol_per_l: f64) -> f64 {
    mmol_per_l * GLUCOSE_MG_PER_DL_PER_MMOL_PER_L
}

/// Convert a glucose concentration from mg/dL to mmol/L.
#[inline]
pub fn mg_per_dl_to_mmol_per_l(mg_per_dl: f64) -> f64 {
    mg_per_dl / GLUCOSE_MG_PER_DL_PER_MMOL_PER_L
}
