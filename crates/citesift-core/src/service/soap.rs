//! SOAP-over-HTTP transport for the WOK web services.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use quick_xml::escape::escape;

use super::{
    Request, ResultRecords, RetrieveParameters, SearchResponse, SearchService, ServiceError,
    ServiceMode,
};
use crate::Config;
use crate::normalize::{CitedReference, LabelValues, LiteRecord};
use crate::query::TimeSpan;
use crate::xml::{XmlNode, parse_document};

pub const DEFAULT_AUTH_URL: &str =
    "http://search.webofknowledge.com/esti/wokmws/ws/WOKMWSAuthenticate";
pub const DEFAULT_SEARCH_URL: &str = "http://search.webofknowledge.com/esti/wokmws/ws/WokSearch";
pub const DEFAULT_SEARCH_LITE_URL: &str =
    "http://search.webofknowledge.com/esti/wokmws/ws/WokSearchLite";

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const AUTH_NS: &str = "http://auth.cxf.wokmws.thomsonreuters.com";
const SEARCH_NS: &str = "http://woksearch.v3.wokmws.thomsonreuters.com";
const SEARCH_LITE_NS: &str = "http://woksearchlite.v3.wokmws.thomsonreuters.com";

/// [`SearchService`] speaking SOAP to the authenticate and search endpoints.
pub struct SoapService {
    client: reqwest::Client,
    mode: ServiceMode,
    auth_url: String,
    search_url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl SoapService {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, config)
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            mode: config.mode,
            auth_url: config.auth_url.clone(),
            search_url: config.search_endpoint().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn search_ns(&self) -> &'static str {
        match self.mode {
            ServiceMode::Full => SEARCH_NS,
            ServiceMode::Lite => SEARCH_LITE_NS,
        }
    }

    /// POST one envelope and return the parsed `<Body>` content.
    async fn post(
        &self,
        url: &str,
        token: Option<&str>,
        envelope: String,
    ) -> Result<XmlNode, ServiceError> {
        let mut req = self
            .client
            .post(url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .timeout(self.timeout)
            .body(envelope);
        if let Some(token) = token {
            req = req.header("Cookie", format!("SID=\"{}\"", token));
        } else if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        // Faults come back as HTTP 500 with a body worth reading.
        let root = match parse_document(&body) {
            Ok(root) => root,
            Err(e) if status.is_success() => return Err(ServiceError::Parse(e.to_string())),
            Err(_) => return Err(ServiceError::Transport(format!("HTTP {}", status))),
        };
        if let Some(fault) = root.descendant("Fault") {
            return Err(fault_error(fault));
        }
        if !status.is_success() {
            return Err(ServiceError::Transport(format!("HTTP {}", status)));
        }
        root.descendant("Body")
            .cloned()
            .ok_or_else(|| ServiceError::Parse("response has no SOAP body".to_string()))
    }
}

fn fault_error(fault: &XmlNode) -> ServiceError {
    let message = fault
        .descendant("faultstring")
        .map(|n| n.text.clone())
        .unwrap_or_else(|| "unspecified fault".to_string());
    let lower = message.to_lowercase();
    if !lower.contains("throttle") && (lower.contains("session") || message.contains("SID")) {
        ServiceError::SessionExpired(message)
    } else {
        ServiceError::Fault(message)
    }
}

fn envelope(ns: &str, body: &str) -> String {
    format!(
        "<soapenv:Envelope xmlns:soapenv=\"{ENVELOPE_NS}\" xmlns:ns=\"{ns}\">\
         <soapenv:Header/><soapenv:Body>{body}</soapenv:Body></soapenv:Envelope>"
    )
}

fn element(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", escape(value))
}

fn time_span_xml(span: &TimeSpan) -> String {
    match span {
        TimeSpan::Range { begin, .. } => format!(
            "<timeSpan>{}{}</timeSpan>",
            element("begin", begin),
            element("end", &span.resolved_end().unwrap_or_default())
        ),
        TimeSpan::Symbolic(s) => element("symbolicTimeSpan", s),
    }
}

fn retrieve_xml(rp: &RetrieveParameters, database_id: &str) -> String {
    let mut out = String::from("<retrieveParameters>");
    out.push_str(&element("firstRecord", &rp.first_record.to_string()));
    out.push_str(&element("count", &rp.count.to_string()));
    for (name, ascending) in &rp.sort_fields {
        out.push_str(&format!(
            "<sortField>{}{}</sortField>",
            element("name", name),
            element("sort", if *ascending { "A" } else { "D" })
        ));
    }
    if !rp.view_fields.is_empty() {
        out.push_str("<viewField>");
        out.push_str(&element("collectionName", database_id));
        for field in &rp.view_fields {
            out.push_str(&element("fieldName", field));
        }
        out.push_str("</viewField>");
    }
    for (key, value) in &rp.options {
        out.push_str(&format!(
            "<option>{}{}</option>",
            element("key", key),
            element("value", value)
        ));
    }
    out.push_str("</retrieveParameters>");
    out
}

/// Body element for one request.
fn request_xml(request: &Request) -> String {
    let op = request.operation();
    let inner = match request {
        Request::Search { query, retrieve } => format!(
            "<queryParameters>{}{}{}{}</queryParameters>{}",
            element("databaseId", &query.database_id),
            element("userQuery", &query.user_query),
            time_span_xml(&query.time_span),
            element("queryLanguage", &query.query_language),
            retrieve_xml(retrieve, &query.database_id)
        ),
        Request::Retrieve { query_id, retrieve }
        | Request::CitedReferencesRetrieve { query_id, retrieve } => format!(
            "{}{}",
            element("queryId", query_id),
            retrieve_xml(retrieve, "WOS")
        ),
        Request::CitingArticles {
            database_id,
            uid,
            time_span,
            query_language,
            retrieve,
        } => format!(
            "{}{}{}{}{}",
            element("databaseId", database_id),
            element("uid", uid),
            time_span_xml(time_span),
            element("queryLanguage", query_language),
            retrieve_xml(retrieve, database_id)
        ),
        Request::CitedReferences {
            database_id,
            uid,
            query_language,
            retrieve,
        } => format!(
            "{}{}{}{}",
            element("databaseId", database_id),
            element("uid", uid),
            element("queryLanguage", query_language),
            retrieve_xml(retrieve, database_id)
        ),
    };
    format!("<ns:{op}>{inner}</ns:{op}>")
}

fn label_values(node: &XmlNode) -> LabelValues {
    LabelValues {
        label: node.child_text("label").unwrap_or_default().to_string(),
        values: node
            .children
            .iter()
            .filter(|c| c.name == "value")
            .map(|c| c.text.clone())
            .collect(),
    }
}

fn lite_record(node: &XmlNode) -> LiteRecord {
    let group = |name: &str| -> Vec<LabelValues> {
        node.children
            .iter()
            .filter(|c| c.name == name)
            .map(label_values)
            .collect()
    };
    LiteRecord {
        uid: node.child_text("uid").unwrap_or_default().to_string(),
        title: group("title"),
        authors: group("authors"),
        source: group("source"),
        other: group("other"),
        keywords: group("keywords"),
    }
}

fn cited_reference(node: &XmlNode) -> CitedReference {
    let field = |name: &str| node.child_text(name).map(str::to_string);
    CitedReference {
        doc_id: field("docid"),
        cited_author: field("citedAuthor"),
        cited_title: field("citedTitle"),
        cited_work: field("citedWork"),
        hot: field("hot"),
        year: field("year"),
    }
}

fn parse_count(ret: &XmlNode, name: &str) -> Result<u64, ServiceError> {
    match ret.child_text(name) {
        None | Some("") => Ok(0),
        Some(v) => v
            .parse()
            .map_err(|_| ServiceError::Parse(format!("{} is not a number: {}", name, v))),
    }
}

/// Read the `<return>` element of a search-style response.
fn parse_search_response(
    body: &XmlNode,
    mode: ServiceMode,
    references: bool,
) -> Result<SearchResponse, ServiceError> {
    let ret = body
        .descendant("return")
        .ok_or_else(|| ServiceError::Parse("response has no return element".to_string()))?;

    let records = if references {
        ResultRecords::References(
            ret.children
                .iter()
                .filter(|c| c.name == "references")
                .map(cited_reference)
                .collect(),
        )
    } else {
        match mode {
            ServiceMode::Full => match ret.child_text("records") {
                Some(xml) if !xml.is_empty() => ResultRecords::Full(xml.to_string()),
                _ => ResultRecords::Empty,
            },
            ServiceMode::Lite => ResultRecords::Lite(
                ret.children
                    .iter()
                    .filter(|c| c.name == "records")
                    .map(lite_record)
                    .collect(),
            ),
        }
    };

    Ok(SearchResponse {
        query_id: ret.child_text("queryId").unwrap_or_default().to_string(),
        records_found: parse_count(ret, "recordsFound")?,
        records_searched: parse_count(ret, "recordsSearched")?,
        records,
    })
}

impl SearchService for SoapService {
    fn name(&self) -> &str {
        "soap"
    }

    fn authenticate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let body = self
                .post(&self.auth_url, None, envelope(AUTH_NS, "<ns:authenticate/>"))
                .await?;
            body.descendant("return")
                .map(|n| n.text.clone())
                .filter(|t| !t.is_empty())
                .ok_or_else(|| ServiceError::Parse("authenticate returned no token".to_string()))
        })
    }

    fn close_session<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            self.post(
                &self.auth_url,
                Some(token),
                envelope(AUTH_NS, "<ns:closeSession/>"),
            )
            .await
            .map(|_| ())
        })
    }

    fn call<'a>(
        &'a self,
        token: &'a str,
        request: &'a Request,
    ) -> Pin<Box<dyn Future<Output = Result<SearchResponse, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let envelope = envelope(self.search_ns(), &request_xml(request));
            let body = self.post(&self.search_url, Some(token), envelope).await?;
            let references = matches!(
                request,
                Request::CitedReferences { .. } | Request::CitedReferencesRetrieve { .. }
            );
            parse_search_response(&body, self.mode, references)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;

    #[test]
    fn search_envelope_carries_query_and_paging() {
        let request = Request::Search {
            query: QueryBuilder::default().literal("AU=(Smith) AND SO=(Crop Sci*)"),
            retrieve: RetrieveParameters::new(101, 100),
        };
        let xml = request_xml(&request);
        assert!(xml.starts_with("<ns:search><queryParameters><databaseId>WOS</databaseId>"));
        assert!(xml.contains("<userQuery>AU=(Smith) AND SO=(Crop Sci*)</userQuery>"));
        assert!(xml.contains("<begin>1900-01-01</begin><end>"));
        assert!(xml.contains("<firstRecord>101</firstRecord><count>100</count>"));
        assert!(xml.ends_with("</ns:search>"));
    }

    #[test]
    fn options_and_escaping() {
        let request = Request::CitedReferences {
            database_id: "WOS".into(),
            uid: "WOS:<1>".into(),
            query_language: "en".into(),
            retrieve: RetrieveParameters::new(1, 100).with_option("Hot", "On"),
        };
        let xml = request_xml(&request);
        assert!(xml.contains("<uid>WOS:&lt;1&gt;</uid>"));
        assert!(xml.contains("<option><key>Hot</key><value>On</value></option>"));
    }

    #[test]
    fn symbolic_time_span() {
        assert_eq!(
            time_span_xml(&TimeSpan::Symbolic("4week".into())),
            "<symbolicTimeSpan>4week</symbolicTimeSpan>"
        );
    }

    const FULL_RESPONSE: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
      <soap:Body>
        <ns2:searchResponse xmlns:ns2="http://woksearch.v3.wokmws.thomsonreuters.com">
          <return>
            <queryId>7</queryId>
            <recordsFound>250</recordsFound>
            <recordsSearched>55000000</recordsSearched>
            <records>&lt;records&gt;&lt;REC&gt;&lt;UID&gt;WOS:1&lt;/UID&gt;&lt;/REC&gt;&lt;/records&gt;</records>
          </return>
        </ns2:searchResponse>
      </soap:Body>
    </soap:Envelope>"#;

    #[test]
    fn full_response_unescapes_record_document() {
        let root = parse_document(FULL_RESPONSE).unwrap();
        let resp = parse_search_response(&root, ServiceMode::Full, false).unwrap();
        assert_eq!(resp.query_id, "7");
        assert_eq!(resp.records_found, 250);
        assert_eq!(resp.records_searched, 55_000_000);
        assert_eq!(
            resp.records,
            ResultRecords::Full("<records><REC><UID>WOS:1</UID></REC></records>".into())
        );
    }

    #[test]
    fn lite_response_groups_labels() {
        let xml = r#"<Envelope><Body><searchResponse><return>
            <queryId>3</queryId><recordsFound>1</recordsFound><recordsSearched>10</recordsSearched>
            <records>
              <uid>WOS:9</uid>
              <title><label>Title</label><value>Rice</value></title>
              <source><label>Volume</label><value>12</value></source>
              <source><label>Pages</label><value>1-9</value></source>
              <other><label>Identifier.Doi</label><value>10.1/x</value></other>
            </records>
        </return></searchResponse></Body></Envelope>"#;
        let root = parse_document(xml).unwrap();
        let resp = parse_search_response(&root, ServiceMode::Lite, false).unwrap();
        match resp.records {
            ResultRecords::Lite(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].uid, "WOS:9");
                assert_eq!(records[0].source.len(), 2);
                assert_eq!(records[0].other[0].values, vec!["10.1/x"]);
            }
            other => panic!("expected lite records, got {:?}", other),
        }
    }

    #[test]
    fn cited_references_response() {
        let xml = r#"<Envelope><Body><citedReferencesResponse><return>
            <queryId>12</queryId><recordsFound>2</recordsFound><recordsSearched>0</recordsSearched>
            <references><docid>1</docid><citedTitle>Rice yield</citedTitle><hot>yes</hot></references>
            <references><docid>2</docid><citedAuthor>Lee, D</citedAuthor></references>
        </return></citedReferencesResponse></Body></Envelope>"#;
        let root = parse_document(xml).unwrap();
        let resp = parse_search_response(&root, ServiceMode::Full, true).unwrap();
        match resp.records {
            ResultRecords::References(refs) => {
                assert_eq!(refs.len(), 2);
                assert!(refs[0].is_hot());
                assert_eq!(refs[1].cited_author.as_deref(), Some("Lee, D"));
                assert_eq!(refs[1].year, None);
            }
            other => panic!("expected references, got {:?}", other),
        }
    }

    #[test]
    fn session_faults_are_distinguished() {
        let fault = |msg: &str| {
            let xml = format!(
                "<Envelope><Body><Fault><faultcode>soap:Server</faultcode><faultstring>{}</faultstring></Fault></Body></Envelope>",
                msg
            );
            fault_error(parse_document(&xml).unwrap().descendant("Fault").unwrap())
        };
        assert!(matches!(
            fault("Session not found: SID=\"X\""),
            ServiceError::SessionExpired(_)
        ));
        assert!(fault("Server.IDLimitExceeded throttle").is_throttle());
        assert!(matches!(fault("Invalid query"), ServiceError::Fault(_)));
    }
}
