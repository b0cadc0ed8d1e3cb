//! Hashtags derived from a listing's text, location and size.

use crate::models::Listing;
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const FEATURE_KEYWORDS: &[(&str, &str)] = &[
    (r"abejas|colmen", "#Apicultura"),
    (r"monte|bosque|árbol|arbol", "#Monte"),
    (r"agua|arroyo|río|\brio\b|pozo|manantial|cañada|canada|laguna", "#Agua"),
    (r"electricidad|\bluz\b|\bute\b", "#Luz"),
    (r"tranquil|silencio|\bpaz\b", "#Tranquilo"),
    (r"camino|acceso|\bruta\b", "#BuenAcceso"),
    (r"sin\s+construcciones|sin\s+vecinos|deshabitado", "#Aislado"),
    (r"plantación|plantacion|frutal|cultivo|huerta|olivos", "#Cultivo"),
    (r"cercado|alambrado|perimetral", "#Cercado"),
    (r"escritura|título|titulo|documentación|documentacion", "#Escriturado"),
    (r"vista|panorámica|panoramica", "#ConVista"),
    (r"costa|playa|\bmar\b|balneario", "#Costa"),
    (r"chacra", "#Chacra"),
    (r"campo|ganader|agrícola|agricola|forestal|productivo", "#Campo"),
    (r"terreno|\blote\b|solar", "#Terreno"),
    (r"\bcasa\b|rancho|galp[oó]n|caba[ñn]a|tinglado|vivienda|mejoras", "#ConConstrucciones"),
    (r"permuta|permuto", "#Permuta"),
    (r"financia", "#Financiacion"),
    (r"internet|fibra", "#Internet"),
    (r"saneamiento", "#Saneamiento"),
];

/// Department keywords, accented spellings included
const REGIONS: &[(&str, &str)] = &[
    ("artigas", "#Artigas"),
    ("canelones", "#Canelones"),
    ("cerro largo", "#CerroLargo"),
    ("colonia", "#Colonia"),
    ("durazno", "#Durazno"),
    ("flores", "#Flores"),
    ("florida", "#Florida"),
    ("lavalleja", "#Lavalleja"),
    ("maldonado", "#Maldonado"),
    ("montevideo", "#Montevideo"),
    ("paysandú", "#Paysandu"),
    ("paysandu", "#Paysandu"),
    ("río negro", "#RioNegro"),
    ("rio negro", "#RioNegro"),
    ("rivera", "#Rivera"),
    ("rocha", "#Rocha"),
    ("salto", "#Salto"),
    ("san josé", "#SanJose"),
    ("san jose", "#SanJose"),
    ("soriano", "#Soriano"),
    ("tacuarembó", "#Tacuarembo"),
    ("tacuarembo", "#Tacuarembo"),
    ("treinta y tres", "#TreintaYTres"),
];

const COMMON: &[&str] = &["#Uruguay", "#TerrenosUY", "#InmueblesUY"];

fn feature_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        FEATURE_KEYWORDS
            .iter()
            .filter_map(|(pattern, tag)| {
                Regex::new(&format!("(?i){pattern}")).ok().map(|re| (re, *tag))
            })
            .collect()
    })
}

/// Sorted, de-duplicated hashtags for a listing
pub fn generate(listing: &Listing) -> Vec<String> {
    let mut tags: BTreeSet<String> = BTreeSet::new();
    tags.insert(format!("#{}", listing.source.display_name()));

    let description = listing
        .raw_attributes
        .get("description")
        .map(String::as_str)
        .unwrap_or_default();
    let text = format!("{} {} {}", listing.title, listing.location, description).to_lowercase();
    for (re, tag) in feature_patterns() {
        if re.is_match(&text) {
            tags.insert(tag.to_string());
        }
    }

    match region_tags(&listing.location) {
        Some((region, town)) => {
            tags.insert(region.to_string());
            if let Some(town) = town {
                tags.insert(town);
            }
        }
        None => {
            tags.insert("#UbicacionDesconocida".to_string());
        }
    }

    tags.insert(size_bucket(listing.area.hectares()).to_string());
    tags.extend(COMMON.iter().map(|t| t.to_string()));
    tags.into_iter().collect()
}

/// Department tag, plus a CamelCase town tag when the location names one
/// before the department
fn region_tags(location: &str) -> Option<(&'static str, Option<String>)> {
    let lower = location.to_lowercase();
    let (keyword, region) = REGIONS.iter().find(|(keyword, _)| lower.contains(keyword))?;

    let town = lower
        .split(keyword)
        .next()
        .map(|before| before.replace("departamento de", ""))
        .map(|before| camel_case(before.trim_matches(|c: char| c == ',' || c == '-' || c.is_whitespace())))
        .filter(|town| town.chars().count() > 2)
        .map(|town| format!("#{town}"))
        .filter(|tag| !tag.eq_ignore_ascii_case(region));

    Some((region, town))
}

fn camel_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let word: String = word.chars().filter_map(fold_ascii).collect();
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn fold_ascii(c: char) -> Option<char> {
    let folded = match c {
        'á' | 'à' | 'ä' => 'a',
        'é' | 'è' | 'ë' => 'e',
        'í' | 'ì' | 'ï' => 'i',
        'ó' | 'ò' | 'ö' => 'o',
        'ú' | 'ù' | 'ü' => 'u',
        'ñ' => 'n',
        c => c,
    };
    folded.is_ascii_alphanumeric().then_some(folded)
}

fn size_bucket(hectares: Decimal) -> &'static str {
    let ha = |n: i64| Decimal::from(n);
    if hectares < ha(1) {
        "#MenosDe1Ha"
    } else if hectares < ha(5) {
        "#De1a5Ha"
    } else if hectares < ha(10) {
        "#De5a10Ha"
    } else if hectares < ha(50) {
        "#De10a50Ha"
    } else if hectares < ha(100) {
        "#De50a100Ha"
    } else {
        "#MasDe100Ha"
    }
}
