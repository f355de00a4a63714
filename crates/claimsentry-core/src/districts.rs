use crate::claims::Location;

/// A Hong Kong district with a representative coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct District {
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

const fn district(name: &'static str, latitude: f64, longitude: f64) -> District {
    District {
        name,
        latitude,
        longitude,
    }
}

impl District {
    pub fn location(&self) -> Location {
        Location {
            district: self.name.to_string(),
            latitude: Some(self.latitude),
            longitude: Some(self.longitude),
        }
    }
}

/// Districts used for geographic reporting; Kwai Tsing is not tracked separately.
pub static HONG_KONG_DISTRICTS: [District; 17] = [
    district("Central and Western", 22.2855, 114.1577),
    district("Wan Chai", 22.2783, 114.1747),
    district("Eastern", 22.2841, 114.2245),
    district("Southern", 22.2461, 114.1625),
    district("Yau Tsim Mong", 22.3193, 114.1694),
    district("Sham Shui Po", 22.3304, 114.1625),
    district("Kowloon City", 22.3301, 114.1916),
    district("Wong Tai Sin", 22.3364, 114.1953),
    district("Kwun Tong", 22.3120, 114.2264),
    district("Tsuen Wan", 22.3688, 114.1138),
    district("Tuen Mun", 22.3910, 113.9773),
    district("Yuen Long", 22.4448, 114.0236),
    district("North", 22.4946, 114.1381),
    district("Tai Po", 22.4509, 114.1638),
    district("Sha Tin", 22.3793, 114.1951),
    district("Sai Kung", 22.3814, 114.2715),
    district("Islands", 22.2644, 113.9462),
];

/// Case-insensitive lookup by district name.
pub fn find(name: &str) -> Option<&'static District> {
    let name = name.trim();
    HONG_KONG_DISTRICTS
        .iter()
        .find(|district| district.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_districts_ignoring_case() {
        let district = find("  sham shui po ").expect("known district");
        assert_eq!(district.name, "Sham Shui Po");
        assert_eq!(district.location().coordinates(), Some((22.3304, 114.1625)));
        assert!(find("Atlantis").is_none());
    }
}
