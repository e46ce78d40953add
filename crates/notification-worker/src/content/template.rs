//! 邮件 HTML 模板
//!
//! 纯函数渲染：相同输入总是得到相同输出，缺少附加图片时直接省略该区块。
//! 所有插值文本都经过 HTML 转义。

use std::fmt::Write;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};

use super::enrichment::PictureOfTheDay;
use crate::models::Notification;

/// 收件人未设置显示名时的称呼
pub const FALLBACK_GREETING_NAME: &str = "Space Enthusiast";

const HIGH_RISK_KM: i64 = 1_000_000;
const MEDIUM_RISK_KM: i64 = 5_000_000;

const STYLE: &str = "body{font-family:Georgia,'Times New Roman',serif;margin:0;padding:20px;\
background:#fafaf9;color:#2c2c2c;line-height:1.6}\
.container{max-width:650px;margin:0 auto;background:#fff;border:1px solid #ddd}\
.header{background:#2b4c85;color:#fff;padding:25px 30px}\
.content{padding:30px}\
.asteroid-item{background:#f8f9fa;border:1px solid #dee2e6;margin-bottom:20px;padding:20px}\
.asteroid-name{font-size:18px;font-weight:bold;margin-bottom:12px}\
.detail-label{font-weight:bold;color:#666;padding-right:15px}\
.space-photo{border:1px solid #ccc;margin:25px 0;padding:15px}\
.photo-img{width:100%;height:auto}\
.footer{background:#f1f3f4;padding:20px 30px;font-size:12px;color:#666}\
.risk-high{color:#d73527;font-weight:bold}\
.risk-medium{color:#f57c00;font-weight:bold}\
.risk-low{color:#2e7d32;font-weight:bold}";

/// 按最近接近距离划分的风险等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl RiskLevel {
    /// 小于 100 万公里为 HIGH，小于 500 万公里为 MEDIUM，其余为 LOW
    pub fn from_miss_distance(km: &BigDecimal) -> Self {
        if *km < BigDecimal::from(HIGH_RISK_KM) {
            Self::High
        } else if *km < BigDecimal::from(MEDIUM_RISK_KM) {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    fn css_class(&self) -> &'static str {
        match self {
            Self::High => "risk-high",
            Self::Medium => "risk-medium",
            Self::Low => "risk-low",
        }
    }
}

/// 转义 HTML 特殊字符
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn format_km(km: &BigDecimal) -> String {
    match km.to_f64() {
        Some(value) => format!("{value:.2}"),
        None => km.to_string(),
    }
}

fn render_card(html: &mut String, notification: &Notification) {
    let risk = RiskLevel::from_miss_distance(&notification.miss_distance_km);

    let _ = write!(
        html,
        "<div class=\"asteroid-item\">\
         <div class=\"asteroid-name\">{name}</div>\
         <table>\
         <tr><td class=\"detail-label\">Closest Approach:</td><td>{date}</td></tr>\
         <tr><td class=\"detail-label\">Estimated Diameter:</td><td>{diameter:.2} m</td></tr>\
         <tr><td class=\"detail-label\">Miss Distance:</td><td>{distance} km</td></tr>\
         <tr><td class=\"detail-label\">Risk Level:</td><td><span class=\"{class}\">{risk}</span></td></tr>\
         </table>\
         </div>",
        name = escape_html(&notification.asteroid_name),
        date = notification.close_approach_date.format("%Y-%m-%d"),
        diameter = notification.estimated_diameter_avg_m,
        distance = format_km(&notification.miss_distance_km),
        class = risk.css_class(),
        risk = risk.label(),
    );
}

fn render_picture(html: &mut String, picture: &PictureOfTheDay) {
    let _ = write!(
        html,
        "<div class=\"space-photo\">\
         <h3>Featured Space Image</h3>\
         <img src=\"{url}\" alt=\"{title}\" class=\"photo-img\">\
         <p><strong>{title}</strong></p>\
         <p>{explanation}</p>\
         <p>Image Date: {date}",
        url = escape_html(&picture.url),
        title = escape_html(&picture.title),
        explanation = escape_html(&picture.explanation),
        date = escape_html(&picture.date),
    );
    if let Some(copyright) = picture.copyright.as_deref().filter(|c| !c.is_empty()) {
        let _ = write!(html, " &middot; Credit: {}", escape_html(copyright));
    }
    html.push_str("</p></div>");
}

/// 渲染告警邮件
///
/// `notifications` 为空时返回空字符串，由调用方视为构建失败。
pub fn render(
    notifications: &[Notification],
    recipient_name: &str,
    picture: Option<&PictureOfTheDay>,
    generated_at: DateTime<Utc>,
) -> String {
    if notifications.is_empty() {
        return String::new();
    }

    let name = recipient_name.trim();
    let name = if name.is_empty() {
        FALLBACK_GREETING_NAME
    } else {
        name
    };

    let mut html = String::with_capacity(2048 + notifications.len() * 512);
    let _ = write!(
        html,
        "<!DOCTYPE html><html lang=\"en\"><head><meta charset=\"UTF-8\">\
         <title>NASA Asteroid Alert</title><style>{style}</style></head><body>\
         <div class=\"container\">\
         <div class=\"header\"><h1>NASA Asteroid Alert</h1>\
         <div>Potentially hazardous close approaches</div></div>\
         <div class=\"content\">\
         <p>Hello {name}! {count} potentially hazardous object(s) are making close approaches to Earth.</p>",
        style = STYLE,
        name = escape_html(name),
        count = notifications.len(),
    );

    for notification in notifications {
        render_card(&mut html, notification);
    }

    if let Some(picture) = picture {
        render_picture(&mut html, picture);
    }

    let _ = write!(
        html,
        "</div><div class=\"footer\">\
         <p>Report generated on {}</p>\
         <p>Data provided by NASA NeoWs and the Astronomy Picture of the Day</p>\
         </div></div></body></html>",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
    );

    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_shared::events::HazardEvent;
    use chrono::{NaiveDate, TimeZone};
    use std::str::FromStr;

    fn notification(name: &str, km: &str, diameter: f64) -> Notification {
        Notification::from_event(HazardEvent::new(
            name,
            NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            BigDecimal::from_str(km).unwrap(),
            diameter,
        ))
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_risk_level_thresholds() {
        let level = |km: &str| RiskLevel::from_miss_distance(&BigDecimal::from_str(km).unwrap());

        assert_eq!(level("999999.99"), RiskLevel::High);
        assert_eq!(level("1000000"), RiskLevel::Medium);
        assert_eq!(level("4999999.9"), RiskLevel::Medium);
        assert_eq!(level("5000000"), RiskLevel::Low);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_render_contains_every_notification() {
        let notifications = vec![
            notification("(2024 AB1)", "450000.123", 120.456),
            notification("433 Eros", "26000000", 16840.0),
        ];

        let html = render(&notifications, "Ada", None, generated_at());

        assert!(html.contains("Hello Ada!"));
        assert!(html.contains("(2024 AB1)"));
        assert!(html.contains("120.46 m"));
        assert!(html.contains("450000.12 km"));
        assert!(html.contains(">HIGH<"));
        assert!(html.contains("433 Eros"));
        assert!(html.contains(">LOW<"));
        assert!(html.contains("2026-10-14 08:30 UTC"));
        assert!(!html.contains("Featured Space Image"));
    }

    #[test]
    fn test_render_falls_back_to_generic_greeting() {
        let notifications = vec![notification("(2024 AB1)", "450000", 120.0)];
        let html = render(&notifications, "   ", None, generated_at());
        assert!(html.contains("Hello Space Enthusiast!"));
    }

    #[test]
    fn test_render_escapes_interpolated_text() {
        let notifications = vec![notification("<script>alert(1)</script>", "450000", 1.0)];
        let html = render(&notifications, "Bob & Alice", None, generated_at());

        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("Bob &amp; Alice"));
    }

    #[test]
    fn test_render_includes_picture_when_present() {
        let picture = PictureOfTheDay {
            title: "Orion \"Nebula\"".to_string(),
            date: "2026-10-14".to_string(),
            explanation: "Stars are born here.".to_string(),
            url: "https://apod.nasa.gov/orion.jpg".to_string(),
            hdurl: None,
            copyright: Some("J. Smith".to_string()),
        };
        let notifications = vec![notification("(2024 AB1)", "450000", 120.0)];

        let html = render(&notifications, "Ada", Some(&picture), generated_at());

        assert!(html.contains("Featured Space Image"));
        assert!(html.contains("Orion &quot;Nebula&quot;"));
        assert!(html.contains("Credit: J. Smith"));
    }

    #[test]
    fn test_render_empty_notifications_yields_empty() {
        assert!(render(&[], "Ada", None, generated_at()).is_empty());
    }
}
