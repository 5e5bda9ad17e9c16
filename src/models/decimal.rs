use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;

/// 舍入方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 向正无穷
    Ceiling,
    /// 向负无穷
    Floor,
    /// 四舍五入 (远离零)
    HalfAwayFromZero,
}

/// 可接受的最大 |scale|; 超出视为非数字 (防止 "1e30000000" 展开成巨型整数)
pub const MAX_SCALE: i64 = 1000;

/// 解析十进制字符串 (空白、非法或指数超限返回 None)
pub fn parse_decimal(text: &str) -> Option<BigDecimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    BigDecimal::from_str(trimmed)
        .ok()
        .filter(|n| n.as_bigint_and_exponent().1.abs() <= MAX_SCALE)
}

/// 规范化: 去掉尾随零, 整数保持 scale 0 (1, 1.0, 1.00 得到同一表示)
pub fn canonical(value: &BigDecimal) -> BigDecimal {
    let normalized = value.normalized();
    let (_, scale) = normalized.as_bigint_and_exponent();
    if scale < 0 {
        normalized.with_scale(0)
    } else {
        normalized
    }
}

/// 按小数位数舍入
pub fn round_to(value: &BigDecimal, places: i64, direction: Direction) -> BigDecimal {
    // with_scale 截断方向为零
    let truncated = value.with_scale(places);
    if &truncated == value {
        return truncated;
    }

    let ulp = BigDecimal::new(BigInt::from(1), places);
    let positive = *value > BigDecimal::zero();

    match direction {
        Direction::Ceiling if positive => truncated + ulp,
        Direction::Ceiling => truncated,
        Direction::Floor if positive => truncated,
        Direction::Floor => truncated - ulp,
        Direction::HalfAwayFromZero => {
            let remainder = (value - &truncated).abs();
            let half = BigDecimal::new(BigInt::from(5), places + 1);
            if remainder < half {
                truncated
            } else if positive {
                truncated + ulp
            } else {
                truncated - ulp
            }
        }
    }
}
