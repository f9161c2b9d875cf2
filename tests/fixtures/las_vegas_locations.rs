//! Real Las Vegas / Henderson locations for dispatch fixtures.
//!
//! Coordinates sourced from OpenStreetMap via Overpass API. They are
//! routable with the OSRM Nevada extract.

/// A named site with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }
}

// ============================================================================
// Where technicians start their day
// ============================================================================

pub const SERVICE_YARDS: &[Location] = &[
    Location::new("Wynn Las Vegas", 36.1263781, -115.1658180),
    Location::new("MGM Grand", 36.1023654, -115.1688720),
    Location::new("Longhorn Casino", 36.1070664, -115.0591256),
];

// ============================================================================
// Customer sites: Strip
// ============================================================================

pub const STRIP_CUSTOMERS: &[Location] = &[
    Location::new("Hard Rock Cafe", 36.1041592, -115.1722166),
    Location::new("SW Steakhouse", 36.1262145, -115.1669146),
    Location::new("Sinatra", 36.1300035, -115.1654850),
    Location::new("Public House", 36.1219193, -115.1689317),
    Location::new("The Crack Shack", 36.1050709, -115.1735287),
    Location::new("Brooklyn Bowl", 36.1175388, -115.1695094),
    Location::new("Gordon Ramsay BurGR", 36.1107195, -115.1720818),
    Location::new("Spago by Wolfgang Puck", 36.1139368, -115.1741462),
    Location::new("BLT Steakhouse", 36.1135528, -115.1690095),
    Location::new("Hash House A Go Go", 36.1181377, -115.1710989),
];

// ============================================================================
// Customer sites: Henderson and the east side
// ============================================================================

pub const HENDERSON_CUSTOMERS: &[Location] = &[
    Location::new("I Love Sushi Henderson", 35.9916660, -115.1028343),
    Location::new("Islander's Grill", 36.0335058, -114.9856162),
    Location::new("Naga", 36.0137634, -114.9928676),
    Location::new("RibCage", 35.9949754, -115.0999810),
    Location::new("Green Valley Ranch Area", 36.0308, -115.0825),
    Location::new("Sunset Station Area", 36.0614, -115.0631),
];

/// Every customer site, Strip first.
pub fn customer_sites() -> Vec<Location> {
    STRIP_CUSTOMERS
        .iter()
        .chain(HENDERSON_CUSTOMERS)
        .cloned()
        .collect()
}
