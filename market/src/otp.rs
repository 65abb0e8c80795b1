use rand::Rng;

/// Generates a 4-digit delivery confirmation code in 1000..=9999.
pub fn generate_otp() -> i64 {
    rand::thread_rng().gen_range(1000..=9999)
}
