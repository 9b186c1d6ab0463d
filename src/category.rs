//! Keyword classification of product names.

use serde::Serialize;

const LUXURY: &[&str] = &[
    "chloe", "louis vuitton", "gucci", "hermes", "chanel", "prada", "fendi", "balenciaga",
    "dior", "celine", "givenchy", "saint laurent", "valentino", "bottega", "moynat",
    "goyard", "delvaux", "mansur gavriel", "strathberry", "aspinal", "mulberry",
    "leather", "premium", "luxury", "designer", "handbag", "bag", "purse", "tote",
    "wallet", "clutch", "crossbody", "shoulder bag", "backpack", "duffle",
];

const ELECTRONICS: &[&str] = &[
    "phone", "smartphone", "laptop", "computer", "tablet", "ipad", "iphone", "samsung",
    "macbook", "dell", "hp", "lenovo", "asus", "acer", "msi", "gaming", "console",
    "playstation", "xbox", "nintendo", "switch", "headphones", "earbuds", "airpods",
    "camera", "canon", "nikon", "sony", "gopro", "drone", "tv", "television", "monitor",
    "keyboard", "mouse", "speaker", "bluetooth", "wireless", "charger", "cable",
];

const FASHION: &[&str] = &[
    "shirt", "t-shirt", "pants", "jeans", "dress", "skirt", "jacket", "coat", "sweater",
    "sweatshirt", "hoodie", "blazer", "suit", "tie", "scarf", "hat", "cap", "shoes",
    "sneakers", "boots", "sandals", "heels", "flats", "jewelry", "watch", "ring",
    "necklace", "bracelet", "earrings", "sunglasses", "belt", "socks",
    "underwear", "lingerie", "swimwear", "activewear", "athletic", "sportswear",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Luxury,
    Electronics,
    Fashion,
    Default,
}

impl Category {
    /// Classify by keywords in the name. Luxury wins over electronics, which
    /// wins over fashion.
    pub fn classify(name: &str) -> Category {
        let padded = pad(name);
        if matches_any(&padded, LUXURY) {
            Category::Luxury
        } else if matches_any(&padded, ELECTRONICS) {
            Category::Electronics
        } else if matches_any(&padded, FASHION) {
            Category::Fashion
        } else {
            Category::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Luxury => "luxury",
            Category::Electronics => "electronics",
            Category::Fashion => "fashion",
            Category::Default => "default",
        }
    }
}

/// Lowercase, with every run of non-alphanumerics collapsed to one space and
/// a space on both ends, so keywords can be matched as whole words.
fn pad(name: &str) -> String {
    let words: Vec<String> = name
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();
    format!(" {} ", words.join(" "))
}

fn matches_any(padded: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| {
        let kw = pad(kw);
        // Plural forms count ("bags", "sneakers" already plural)
        padded.contains(&kw) || padded.contains(&format!("{}s ", kw.trim_end()))
    })
}
