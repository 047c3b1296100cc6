//! Q17.14 signed fixed-point arithmetic for the MLFQS controller.

/// A signed fixed-point number with 14 fractional bits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Fixed(i32);

/// The fixed-point representation of 1.
pub const UNIT: i32 = 1 << 14;

impl Fixed {
    pub const ZERO: Fixed = Fixed(0);

    pub fn from_int(n: i32) -> Fixed {
        Fixed(n * UNIT)
    }

    /// Convert to integer, truncating toward zero.
    pub fn to_int_trunc(self) -> i32 {
        self.0 / UNIT
    }

    /// Convert to integer, rounding to nearest (half away from zero).
    pub fn to_int_round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + UNIT / 2) / UNIT
        } else {
            (self.0 - UNIT / 2) / UNIT
        }
    }

    /// Multiply two fixed-point numbers, lifting through 64 bits.
    pub fn mul(self, other: Fixed) -> Fixed {
        Fixed((i64::from(self.0) * i64::from(other.0) / i64::from(UNIT)) as i32)
    }

    /// Divide by another fixed-point number, lifting through 64 bits.
    pub fn div(self, other: Fixed) -> Fixed {
        Fixed((i64::from(self.0) * i64::from(UNIT) / i64::from(other.0)) as i32)
    }

    pub fn mul_int(self, n: i32) -> Fixed {
        Fixed(self.0 * n)
    }

    pub fn div_int(self, n: i32) -> Fixed {
        Fixed(self.0 / n)
    }
}

impl core::ops::Add for Fixed {
    type Output = Fixed;
    fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }
}

impl core::ops::Sub for Fixed {
    type Output = Fixed;
    fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }
}

impl core::ops::Neg for Fixed {
    type Output = Fixed;
    fn neg(self) -> Fixed {
        Fixed(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        assert_eq!(Fixed::from_int(5).to_int_trunc(), 5);
        assert_eq!(Fixed::from_int(-3).to_int_trunc(), -3);
        // 7/2 = 3.5 rounds away from zero.
        assert_eq!(Fixed::from_int(7).div_int(2).to_int_round(), 4);
        assert_eq!(Fixed::from_int(-7).div_int(2).to_int_round(), -4);
        assert_eq!(Fixed::from_int(7).div_int(2).to_int_trunc(), 3);
    }

    #[test]
    fn mul_div_lift_through_64_bits() {
        let big = Fixed::from_int(60_000);
        assert_eq!(big.mul(Fixed::from_int(2)).to_int_trunc(), 120_000);
        assert_eq!(big.div(Fixed::from_int(3)).to_int_trunc(), 20_000);
    }

    #[test]
    fn load_average_step() {
        // load_avg = (59/60) * load_avg + (1/60) * ready, starting from 0
        // with 1 ready thread, stays below 1 and grows monotonically.
        let mut load = Fixed::ZERO;
        let mut last = Fixed::ZERO;
        for _ in 0..60 {
            load = load.mul_int(59).div_int(60) + Fixed::from_int(1).div_int(60);
            assert!(load > last);
            last = load;
        }
        assert!(load < Fixed::from_int(1));
        assert!(load.mul_int(100).to_int_round() > 60);
    }
}
