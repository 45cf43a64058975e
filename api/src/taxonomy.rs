//! The category taxonomy the feed aggregator's articles are scored against.
//! This table is the one domain constant the engine ships; it is shared by
//! the hierarchical health analytics and the collector and must stay in sync
//! with the categories the onboarding flow offers.

use std::sync::LazyLock;

use regex::Regex;

/// Categories presented during onboarding. A subset of the taxonomy keys:
/// the remaining ones only appear as feed-emitted tags.
pub const ONBOARDING_CATEGORIES: [&str; 9] = [
    "政治",
    "経済",
    "国際",
    "IT・テクノロジー",
    "スポーツ",
    "エンタメ",
    "科学",
    "社会",
    "地方",
];

/// Major category → medium-level keyword list.
pub const CATEGORY_TAXONOMY: [(&str, &[&str]); 13] = [
    (
        "政治",
        &["選挙", "国会", "内閣", "与党", "野党", "外交", "防衛", "憲法", "政策", "行政"],
    ),
    (
        "経済",
        &["株式", "為替", "金融", "企業", "雇用", "貿易", "景気", "物価", "税制", "投資", "不動産"],
    ),
    (
        "国際",
        &["米国", "中国", "韓国", "北朝鮮", "ロシア", "EU", "中東", "アジア", "国連", "紛争"],
    ),
    (
        "IT・テクノロジー",
        &["AI", "人工知能", "スマホ", "セキュリティ", "SNS", "半導体", "ロボット", "宇宙", "通信", "ゲーム", "アプリ"],
    ),
    (
        "スポーツ",
        &["野球", "サッカー", "テニス", "ゴルフ", "バスケ", "陸上", "水泳", "格闘技", "相撲", "競馬", "五輪", "ラグビー"],
    ),
    (
        "エンタメ",
        &["映画", "音楽", "ドラマ", "アニメ", "芸能", "お笑い", "漫画", "舞台", "アイドル", "バラエティ"],
    ),
    (
        "科学",
        &["宇宙", "医療", "環境", "気候", "生物", "物理", "化学", "研究", "ノーベル", "発見"],
    ),
    (
        "社会",
        &["事件", "事故", "裁判", "福祉", "教育", "医療", "災害", "犯罪", "少子化", "高齢化"],
    ),
    (
        "地方",
        &["観光", "祭り", "特産", "自治体", "再開発", "過疎", "移住", "地域"],
    ),
    (
        "ビジネス",
        &["起業", "決算", "M&A", "IPO", "マーケティング", "人事", "経営"],
    ),
    (
        "生活",
        &["健康", "グルメ", "レシピ", "育児", "住まい", "ファッション", "旅行"],
    ),
    (
        "環境",
        &["気候変動", "脱炭素", "再生可能", "リサイクル", "生態系", "温暖化"],
    ),
    (
        "文化",
        &["文学", "美術", "歴史", "伝統", "哲学", "宗教", "建築"],
    ),
];

// Katakana proper nouns of 3+ characters
static KATAKANA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ァ-ヴー]{3,}").expect("katakana pattern is valid"));
// Text inside 「」 quotes
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"「([^」]+)」").expect("bracket pattern is valid"));

/// Common katakana words that carry no topical signal.
const COMMON_KATAKANA: [&str; 7] = [
    "ニュース",
    "テレビ",
    "インター",
    "サービス",
    "システム",
    "プロジェクト",
    "コメント",
];

/// Split a feed's comma-joined category field into trimmed tags. Tags are
/// Japanese free text, so whitespace is trimmed but case is left alone.
pub fn split_categories(category: &str) -> Vec<String> {
    category
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn keywords_for(category: &str) -> Option<&'static [&'static str]> {
    CATEGORY_TAXONOMY
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, keywords)| *keywords)
}

/// Medium-level label: first taxonomy keyword found in the title, searching
/// the article's own categories' keyword lists first, then every list.
pub fn classify_medium(title: &str, category: &str) -> String {
    for cat in split_categories(category) {
        if let Some(keywords) = keywords_for(&cat) {
            for kw in keywords {
                if title.contains(kw) {
                    return (*kw).to_string();
                }
            }
        }
    }
    for (_, keywords) in CATEGORY_TAXONOMY.iter() {
        for kw in *keywords {
            if title.contains(kw) {
                return (*kw).to_string();
            }
        }
    }
    "その他".to_string()
}

/// Minor-level labels: katakana proper nouns and quoted 「…」 phrases from
/// the title, minus the common-word blocklist.
pub fn extract_minor_keywords(title: &str) -> Vec<String> {
    let mut minors: Vec<String> = Vec::new();
    for m in KATAKANA.find_iter(title) {
        let word = m.as_str();
        if !COMMON_KATAKANA.contains(&word) {
            minors.push(word.to_string());
        }
    }
    for c in BRACKETED.captures_iter(title) {
        minors.push(c[1].to_string());
    }
    minors
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_trims_and_drops_empty_tags() {
        assert_eq!(
            split_categories(" 経済 ,, スポーツ"),
            vec!["経済".to_string(), "スポーツ".to_string()]
        );
        assert!(split_categories("").is_empty());
    }

    #[test]
    fn medium_prefers_the_articles_own_category_keywords() {
        // 宇宙 is listed under both IT・テクノロジー and 科学; the article's
        // category decides which list is searched first, but the keyword is
        // the label either way.
        assert_eq!(classify_medium("宇宙開発の新時代", "科学"), "宇宙");
        // 選挙 belongs to 政治 only, and the mismatched category falls
        // through to the full-table scan.
        assert_eq!(classify_medium("選挙戦が始まる", "スポーツ"), "選挙");
    }

    #[test]
    fn medium_falls_back_to_other() {
        assert_eq!(classify_medium("こんにちは", ""), "その他");
    }

    #[test]
    fn medium_respects_keyword_order_within_a_list() {
        // 株式 precedes 投資 in the 経済 list, so it wins even when both hit.
        assert_eq!(classify_medium("投資家が株式を売却", "経済"), "株式");
    }

    #[test]
    fn minor_extracts_katakana_and_quotes() {
        let minors = extract_minor_keywords("トヨタが「新型車」を発表");
        assert_eq!(minors, vec!["トヨタ".to_string(), "新型車".to_string()]);
    }

    #[test]
    fn minor_drops_blocklisted_and_short_katakana() {
        // The blocklist applies to whole matched runs: the exact run ニュース
        // is dropped, while the longer run ニュースアプリ is a different word
        // and survives. 2-char runs never match the pattern.
        assert!(extract_minor_keywords("ニュース速報のアイ").is_empty());
        assert_eq!(
            extract_minor_keywords("ニュースアプリのアイ"),
            vec!["ニュースアプリ".to_string()]
        );
    }

    #[test]
    fn minor_of_plain_title_is_empty() {
        assert!(extract_minor_keywords("日本の経済politics").is_empty());
    }

    #[test]
    fn onboarding_categories_are_taxonomy_keys() {
        for cat in ONBOARDING_CATEGORIES {
            assert!(keywords_for(cat).is_some(), "{cat} missing from taxonomy");
        }
    }
}
