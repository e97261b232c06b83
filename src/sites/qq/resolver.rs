use crate::core::error::{ResolveError, ResolveResult};
use crate::core::fetch::{fetch_json, fetch_text, FetchRequest};
use crate::core::model::{FormatDescriptor, MediaCollection, MediaItem, ResolvedMedia};
use crate::core::testcase::TestCase;
use crate::core::token_exchange::TokenExchange;
use crate::core::xml;
use crate::sites::{ResolveContext, SiteResolver};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use url::form_urlencoded;
use uuid::Uuid;

const PLATFORM: &str = "10902";
const PLAYER_VERSION: &str = "3.2.33.397";
const ENCRYPT_VER: &str = "5.4";
const SWF_URL: &str =
    "https://imgcache.qq.com/tencentvideo_v1/playerv3/TencentPlayer.swf?max_age=86400&v=20170106";
const TOKEN_KEYSTREAM: [u8; 4] = [96, 71, 147, 86];

/// Per-tier clip lookups within one segment run with this much overlap.
/// Order is preserved, and the first failure fails the whole resolution.
const CLIP_CONCURRENCY: usize = 4;

const TEST_CASES: &[TestCase] = &[TestCase::new("https://v.qq.com/x/page/y01647bfni0.html")];

/// Endpoint set for the ticket chain. All fixed upstream constants; tests
/// point the token exchange at a loopback server.
pub struct QqConfig {
    pub ckey_api: String,
    pub checktime_url: String,
    pub vinfo_url: String,
    pub vclip_url: String,
    pub token_host: String,
    pub token_port: u16,
}

impl Default for QqConfig {
    fn default() -> Self {
        Self {
            ckey_api: "http://sandbox.xinfan.org/cgi-bin/txsp/ckey54".into(),
            checktime_url: "https://vv.video.qq.com/checktime".into(),
            vinfo_url: "https://vv.video.qq.com/getvinfo".into(),
            vclip_url: "https://vv.video.qq.com/getvclip".into(),
            token_host: "rlog.video.qq.com".into(),
            token_port: 8080,
        }
    }
}

/// v.qq.com resolver: a time-synchronized ticket chain. Each resolution
/// mints a fresh player guid and session token; nothing is reused across
/// calls because the upstream time-boxes every credential.
pub struct QqResolver {
    pattern: Regex,
    video_info_re: Regex,
    config: QqConfig,
}

impl QqResolver {
    pub fn new() -> Self {
        Self::with_config(QqConfig::default())
    }

    pub fn with_config(config: QqConfig) -> Self {
        Self {
            pattern: Regex::new(r"https?://v\.qq\.com/x/page/(?P<id>[0-9a-z]+)\.html")
                .expect("static pattern"),
            video_info_re: Regex::new(r"(?s)var\s+VIDEO_INFO\s*=\s*(\{.+?\});")
                .expect("static pattern"),
            config,
        }
    }

    fn token_exchange(&self) -> TokenExchange {
        TokenExchange::new(
            self.config.token_host.clone(),
            self.config.token_port,
            TOKEN_KEYSTREAM,
        )
    }

    /// The auxiliary token/ckey-issuing endpoint: a type discriminator
    /// plus free-form parameters, answering `{ "result": <value> }`.
    async fn sandbox_api(
        &self,
        ctx: &ResolveContext<'_>,
        api_type: &str,
        video_id: &str,
        params: &[(&str, String)],
    ) -> ResolveResult<String> {
        #[derive(Deserialize)]
        struct Reply {
            result: serde_json::Value,
        }

        let mut req = FetchRequest::get(&self.config.ckey_api)
            .query("type", api_type)
            .note(format!("[qq] {video_id}: requesting {api_type}"));
        for (name, value) in params {
            req = req.query(*name, value.clone());
        }

        let reply: Reply = fetch_json(ctx.fetch, req).await?;
        Ok(match reply.result {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }

    fn extract_title(&self, webpage: &str) -> ResolveResult<String> {
        let blob = self
            .video_info_re
            .captures(webpage)
            .and_then(|c| c.get(1))
            .ok_or_else(|| ResolveError::protocol("no VIDEO_INFO blob in page"))?;
        let info: serde_json::Value = serde_json::from_str(blob.as_str())
            .map_err(|e| ResolveError::protocol(format!("unparseable VIDEO_INFO: {e}")))?;
        info.get("title")
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::protocol("VIDEO_INFO has no title"))
    }

    /// One getvclip round-trip: resolve the signed filename and key for a
    /// (segment, tier) pair and assemble the playable URL.
    async fn clip_format(
        &self,
        ctx: &ResolveContext<'_>,
        video_id: &str,
        guid: &str,
        ckey: &str,
        vinfo: &Vinfo,
        segment: &str,
        segment_no: usize,
        tier: &QualityTier,
    ) -> ResolveResult<FormatDescriptor> {
        let body = fetch_text(
            ctx.fetch,
            FetchRequest::get(&self.config.vclip_url)
                .header("Referer", SWF_URL)
                .form(form_fields(&[
                    ("cKey", ckey),
                    ("appver", PLAYER_VERSION),
                    ("fmt", &tier.name),
                    ("format", &tier.id),
                    ("linkver", "2"),
                    ("encryptVer", ENCRYPT_VER),
                    ("lnk", &vinfo.lnk),
                    ("idx", segment),
                    ("platform", PLATFORM),
                    ("guid", guid),
                    ("vid", video_id),
                ]))
                .note(format!(
                    "[qq] {video_id}: downloading clip info for segment {segment_no} of format {}",
                    tier.note
                )),
        )
        .await?;

        let clip = parse_vclip(&body)?;
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("sdtfrom", "v1000")
            .append_pair("type", "mp4")
            .append_pair("vkey", &clip.key)
            .append_pair("platform", PLATFORM)
            .append_pair("br", &clip.bitrate.to_string())
            .append_pair("fmt", &clip.fmt)
            .append_pair("sp", &clip.sp.to_string())
            .append_pair("guid", guid)
            .append_pair("level", "0")
            .finish();

        Ok(FormatDescriptor {
            url: format!("{}{}?{}", vinfo.base_url, clip.filename, query),
            note: Some(tier.note.clone()),
            extension: Some("mp4".into()),
            bitrate: Some(clip.bitrate),
        })
    }
}

#[async_trait]
impl SiteResolver for QqResolver {
    fn name(&self) -> &'static str {
        "qq"
    }

    fn url_pattern(&self) -> &Regex {
        &self.pattern
    }

    fn test_cases(&self) -> &'static [TestCase] {
        TEST_CASES
    }

    async fn resolve(&self, url: &str, ctx: &ResolveContext<'_>) -> ResolveResult<ResolvedMedia> {
        let video_id = self
            .match_id(url)
            .ok_or_else(|| ResolveError::protocol("url did not match qq pattern"))?;

        let webpage = fetch_text(
            ctx.fetch,
            FetchRequest::get(url).note(format!("[qq] {video_id}: downloading page")),
        )
        .await?;
        let title = self.extract_title(&webpage)?;

        // Fresh per-session client identifier, never cached.
        let guid = Uuid::new_v4().simple().to_string().to_uppercase();

        let encoded_token = self
            .sandbox_api(
                ctx,
                "token",
                &video_id,
                &[
                    ("guid", guid.clone()),
                    ("platform", PLATFORM.into()),
                    ("player_version", PLAYER_VERSION.into()),
                ],
            )
            .await?;
        let rtoken = self.token_exchange().exchange(&encoded_token).await?;

        let checktime_body = fetch_text(
            ctx.fetch,
            FetchRequest::get(&self.config.checktime_url)
                .query("ran", random_fraction())
                .note(format!("[qq] {video_id}: downloading server time")),
        )
        .await?;
        let (timestamp, server_rand) = parse_checktime(&checktime_body)?;

        let ckey = self
            .sandbox_api(
                ctx,
                "ckey",
                &video_id,
                &[
                    ("rtoken", rtoken),
                    ("platform", PLATFORM.into()),
                    ("version", ENCRYPT_VER.into()),
                    ("player_version", PLAYER_VERSION.into()),
                    ("vid", video_id.clone()),
                    ("timestamp", timestamp),
                    ("rand", server_rand),
                    ("sd", "bceg".into()),
                    ("guid", guid.clone()),
                ],
            )
            .await?;

        let speed = rand::thread_rng().gen_range(5000..9000).to_string();
        let pid = Uuid::new_v4().simple().to_string().to_uppercase();
        let vinfo_body = fetch_text(
            ctx.fetch,
            FetchRequest::get(&self.config.vinfo_url)
                .header("Referer", SWF_URL)
                .form(form_fields(&[
                    ("vid", &video_id),
                    ("linkver", "2"),
                    ("otype", "xml"),
                    ("defnpayver", "1"),
                    ("platform", PLATFORM),
                    ("newplatform", PLATFORM),
                    ("charge", "0"),
                    ("ran", &random_fraction()),
                    ("speed", &speed),
                    ("defaultfmt", "shd"),
                    ("pid", &pid),
                    ("appver", PLAYER_VERSION),
                    ("fhdswitch", "0"),
                    ("guid", &guid),
                    ("ehost", url),
                    ("dtype", "3"),
                    ("fp2p", "1"),
                    ("cKey", &ckey),
                    ("utype", "0"),
                    ("encryptVer", ENCRYPT_VER),
                    ("ip", ""),
                    ("defn", "shd"),
                    ("sphls", "1"),
                    ("refer", ""),
                    ("drm", "8"),
                    ("sphttps", "1"),
                ]))
                .note(format!("[qq] {video_id}: downloading video info")),
        )
        .await?;
        let vinfo = parse_vinfo(&vinfo_body)?;

        let mut entries = Vec::with_capacity(vinfo.segments.len());
        for (idx, segment) in vinfo.segments.iter().enumerate() {
            let lookups: Vec<_> = vinfo
                .tiers
                .iter()
                .map(|tier| {
                    self.clip_format(ctx, &video_id, &guid, &ckey, &vinfo, segment, idx + 1, tier)
                })
                .collect();
            let formats: Vec<FormatDescriptor> = stream::iter(lookups)
                .buffered(CLIP_CONCURRENCY)
                .try_collect()
                .await?;

            let mut item = MediaItem::new(format!("{}_{}", video_id, idx + 1), title.clone());
            item.formats = formats;
            entries.push(item);
        }

        if entries.len() == 1 {
            let mut item = entries.remove(0);
            item.id = video_id;
            Ok(ResolvedMedia::Single(item))
        } else {
            Ok(ResolvedMedia::Collection(MediaCollection {
                id: video_id,
                title,
                entries,
            }))
        }
    }
}

fn form_fields(fields: &[(&str, &str)]) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Random fraction rendered the way the upstream expects (`%.16f`).
fn random_fraction() -> String {
    format!("{:.16}", rand::thread_rng().gen::<f64>())
}

struct QualityTier {
    id: String,
    name: String,
    note: String,
}

struct Vinfo {
    lnk: String,
    base_url: String,
    /// `idx` values of the `ci` segment elements, in order.
    segments: Vec<String>,
    tiers: Vec<QualityTier>,
}

fn parse_checktime(body: &str) -> ResolveResult<(String, String)> {
    let doc = xml::parse(body)?;
    let root = doc.root_element();
    let timestamp = xml::text(root, "t")?.to_string();
    let rand = xml::text(root, "rand")?.to_string();
    Ok((timestamp, rand))
}

fn parse_vinfo(body: &str) -> ResolveResult<Vinfo> {
    let doc = xml::parse(body)?;
    let root = doc.root_element();
    let vi = xml::require(root, "vl/vi")?;

    let segments: Vec<String> = xml::elements(xml::require(vi, "cl")?, "ci")
        .into_iter()
        .map(|ci| xml::text(ci, "idx").map(str::to_string))
        .collect::<ResolveResult<_>>()?;
    if segments.is_empty() {
        return Err(ResolveError::protocol("video info lists no segments"));
    }

    let tiers: Vec<QualityTier> = xml::elements(xml::require(root, "fl")?, "fi")
        .into_iter()
        .map(|fi| {
            Ok(QualityTier {
                id: xml::text(fi, "id")?.to_string(),
                name: xml::text(fi, "name")?.to_string(),
                note: xml::text(fi, "cname")?.to_string(),
            })
        })
        .collect::<ResolveResult<_>>()?;
    if tiers.is_empty() {
        return Err(ResolveError::protocol("video info lists no quality tiers"));
    }

    Ok(Vinfo {
        lnk: xml::text(vi, "lnk")?.to_string(),
        base_url: xml::text(vi, "ul/ui/url")?.to_string(),
        segments,
        tiers,
    })
}

struct ClipInfo {
    filename: String,
    key: String,
    bitrate: i64,
    fmt: String,
    sp: i64,
}

fn parse_vclip(body: &str) -> ResolveResult<ClipInfo> {
    let doc = xml::parse(body)?;
    let vi = xml::require(doc.root_element(), "vi")?;
    Ok(ClipInfo {
        filename: xml::text(vi, "fn")?.to_string(),
        key: xml::text(vi, "key")?.to_string(),
        bitrate: parse_int(xml::text(vi, "br")?)?,
        fmt: xml::text(vi, "fmt")?.to_string(),
        sp: parse_int(xml::text(vi, "fs")?)?,
    })
}

fn parse_int(s: &str) -> ResolveResult<i64> {
    s.trim()
        .parse()
        .map_err(|_| ResolveError::protocol(format!("expected integer, got {s:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VINFO_XML: &str = "<root>\
        <vl><vi>\
            <lnk>lnk0</lnk>\
            <cl><ci><idx>1</idx></ci><ci><idx>2</idx></ci></cl>\
            <ul><ui><url>http://video.store.qq.com/</url></ui></ul>\
        </vi></vl>\
        <fl>\
            <fi><id>10209</id><name>shd</name><cname>超清</cname></fi>\
            <fi><id>10212</id><name>hd</name><cname>高清</cname></fi>\
        </fl>\
    </root>";

    #[test]
    fn parses_vinfo_segments_and_tiers() {
        let vinfo = parse_vinfo(VINFO_XML).unwrap();
        assert_eq!(vinfo.lnk, "lnk0");
        assert_eq!(vinfo.base_url, "http://video.store.qq.com/");
        assert_eq!(vinfo.segments, vec!["1", "2"]);
        assert_eq!(vinfo.tiers.len(), 2);
        assert_eq!(vinfo.tiers[0].id, "10209");
        assert_eq!(vinfo.tiers[1].name, "hd");
    }

    #[test]
    fn vinfo_without_segments_is_a_protocol_error() {
        let body = "<root><vl><vi><lnk>l</lnk><cl/>\
            <ul><ui><url>u</url></ui></ul></vi></vl><fl/></root>";
        assert!(matches!(
            parse_vinfo(body),
            Err(ResolveError::Protocol(_))
        ));
    }

    #[test]
    fn parses_checktime_reply() {
        let (t, r) =
            parse_checktime("<result><t>1500000000</t><rand>abcd</rand></result>").unwrap();
        assert_eq!(t, "1500000000");
        assert_eq!(r, "abcd");
    }

    #[test]
    fn parses_vclip_reply() {
        let clip = parse_vclip(
            "<root><vi><fn>y0.mp4</fn><key>VKEY</key><br>206</br>\
             <fmt>shd</fmt><fs>12345</fs></vi></root>",
        )
        .unwrap();
        assert_eq!(clip.filename, "y0.mp4");
        assert_eq!(clip.key, "VKEY");
        assert_eq!(clip.bitrate, 206);
        assert_eq!(clip.sp, 12345);
    }

    #[test]
    fn extracts_title_from_video_info_blob() {
        let resolver = QqResolver::new();
        let page = "junk var VIDEO_INFO = {\"title\":\"some show\",\"vid\":\"y0\"}; more";
        assert_eq!(resolver.extract_title(page).unwrap(), "some show");
        assert!(matches!(
            resolver.extract_title("no blob here"),
            Err(ResolveError::Protocol(_))
        ));
    }

    #[test]
    fn random_fraction_has_sixteen_decimals() {
        let ran = random_fraction();
        let (int, frac) = ran.split_once('.').unwrap();
        assert_eq!(int, "0");
        assert_eq!(frac.len(), 16);
    }
}
