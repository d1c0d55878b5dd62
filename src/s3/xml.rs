//! C11 response rendering (spec.md §4.11, §6 "XML responses in the
//! `http://s3.amazonaws.com/doc/2006-03-01/` namespace").
//!
//! Grounded on the teacher's hand-built `format!`-string XML (kept for
//! texture), with every user-supplied value now routed through
//! `error::xml_escape` — the teacher's version interpolated `bucket.name`
//! and object keys directly, which is unsafe for keys containing `<`/`&`.
//! The one inbound XML body (`DeleteObjects`) is parsed with `quick_xml`
//! rather than hand-rolled, since parsing arbitrary nesting by hand is the
//! kind of thing that silently mis-handles escaped entities.

use crate::error::{xml_escape, Error, Result};
use crate::models::{Bucket, UploadPart};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

const XML_NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

fn rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub struct ListedObject {
    pub key: String,
    pub size: i64,
    pub etag: Uuid,
    pub last_modified: DateTime<Utc>,
}

pub fn list_buckets_response(owner_id: Uuid, buckets: &[Bucket]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<ListAllMyBucketsResult xmlns=\"{}\">", XML_NS));
    xml.push_str("\n  <Owner>");
    xml.push_str(&format!("\n    <ID>{}</ID>", owner_id));
    xml.push_str("\n  </Owner>");
    xml.push_str("\n  <Buckets>");
    for bucket in buckets {
        xml.push_str(&format!(
            "\n    <Bucket>\n      <Name>{}</Name>\n      <CreationDate>{}</CreationDate>\n    </Bucket>",
            xml_escape(&bucket.name),
            rfc3339(&bucket.created_at),
        ));
    }
    xml.push_str("\n  </Buckets>");
    xml.push_str("\n</ListAllMyBucketsResult>");
    xml
}

pub struct ListObjectsV1Params<'a> {
    pub prefix: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub marker: Option<&'a str>,
    pub max_keys: usize,
}

pub struct ListObjectsV2Params<'a> {
    pub prefix: Option<&'a str>,
    pub delimiter: Option<&'a str>,
    pub continuation_token: Option<&'a str>,
    pub start_after: Option<&'a str>,
    pub max_keys: usize,
}

fn contents_and_prefixes(contents: &[ListedObject], prefixes: &[String]) -> String {
    let mut xml = String::new();
    for object in contents {
        xml.push_str("\n  <Contents>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(&object.key)));
        xml.push_str(&format!("\n    <LastModified>{}</LastModified>", rfc3339(&object.last_modified)));
        xml.push_str(&format!("\n    <ETag>&quot;{}&quot;</ETag>", object.etag));
        xml.push_str(&format!("\n    <Size>{}</Size>", object.size));
        xml.push_str("\n    <StorageClass>STANDARD</StorageClass>");
        xml.push_str("\n  </Contents>");
    }
    for prefix in prefixes {
        xml.push_str("\n  <CommonPrefixes>");
        xml.push_str(&format!("\n    <Prefix>{}</Prefix>", xml_escape(prefix)));
        xml.push_str("\n  </CommonPrefixes>");
    }
    xml
}

pub fn list_objects_v1_response(
    bucket: &str,
    params: &ListObjectsV1Params,
    contents: &[ListedObject],
    prefixes: &[String],
    is_truncated: bool,
    next_marker: Option<&str>,
) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<ListBucketResult xmlns=\"{}\">", XML_NS));
    xml.push_str(&format!("\n  <Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Prefix>{}</Prefix>", xml_escape(params.prefix.unwrap_or(""))));
    xml.push_str(&format!("\n  <Marker>{}</Marker>", xml_escape(params.marker.unwrap_or(""))));
    if let Some(delimiter) = params.delimiter {
        xml.push_str(&format!("\n  <Delimiter>{}</Delimiter>", xml_escape(delimiter)));
    }
    xml.push_str(&format!("\n  <MaxKeys>{}</MaxKeys>", params.max_keys));
    xml.push_str(&format!("\n  <IsTruncated>{}</IsTruncated>", is_truncated));
    if let Some(marker) = next_marker {
        xml.push_str(&format!("\n  <NextMarker>{}</NextMarker>", xml_escape(marker)));
    }
    xml.push_str(&contents_and_prefixes(contents, prefixes));
    xml.push_str("\n</ListBucketResult>");
    xml
}

pub fn list_objects_v2_response(
    bucket: &str,
    params: &ListObjectsV2Params,
    contents: &[ListedObject],
    prefixes: &[String],
    is_truncated: bool,
    next_continuation_token: Option<&str>,
) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<ListBucketResult xmlns=\"{}\">", XML_NS));
    xml.push_str(&format!("\n  <Name>{}</Name>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Prefix>{}</Prefix>", xml_escape(params.prefix.unwrap_or(""))));
    if let Some(delimiter) = params.delimiter {
        xml.push_str(&format!("\n  <Delimiter>{}</Delimiter>", xml_escape(delimiter)));
    }
    xml.push_str(&format!("\n  <MaxKeys>{}</MaxKeys>", params.max_keys));
    xml.push_str(&format!("\n  <KeyCount>{}</KeyCount>", contents.len() + prefixes.len()));
    xml.push_str(&format!("\n  <IsTruncated>{}</IsTruncated>", is_truncated));
    if let Some(token) = params.continuation_token {
        xml.push_str(&format!("\n  <ContinuationToken>{}</ContinuationToken>", xml_escape(token)));
    }
    if let Some(after) = params.start_after {
        xml.push_str(&format!("\n  <StartAfter>{}</StartAfter>", xml_escape(after)));
    }
    if let Some(token) = next_continuation_token {
        xml.push_str(&format!("\n  <NextContinuationToken>{}</NextContinuationToken>", xml_escape(token)));
    }
    xml.push_str(&contents_and_prefixes(contents, prefixes));
    xml.push_str("\n</ListBucketResult>");
    xml
}

pub fn initiate_multipart_response(bucket: &str, key: &str, upload_id: Uuid) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<InitiateMultipartUploadResult xmlns=\"{}\">\n  <Bucket>{}</Bucket>\n  <Key>{}</Key>\n  <UploadId>{}</UploadId>\n</InitiateMultipartUploadResult>",
        XML_NS,
        xml_escape(bucket),
        xml_escape(key),
        upload_id,
    )
}

pub fn complete_multipart_response(bucket: &str, key: &str, object_id: Uuid) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUploadResult xmlns=\"{}\">\n  <Location>/{}/{}</Location>\n  <Bucket>{}</Bucket>\n  <Key>{}</Key>\n  <ETag>&quot;{}&quot;</ETag>\n</CompleteMultipartUploadResult>",
        XML_NS,
        xml_escape(bucket),
        xml_escape(key),
        xml_escape(bucket),
        xml_escape(key),
        object_id,
    )
}

pub struct ListedUpload {
    pub key: String,
    pub upload_id: Uuid,
}

pub fn list_multipart_uploads_response(bucket: &str, uploads: &[ListedUpload]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<ListMultipartUploadsResult xmlns=\"{}\">", XML_NS));
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(bucket)));
    xml.push_str("\n  <IsTruncated>false</IsTruncated>");
    for upload in uploads {
        xml.push_str("\n  <Upload>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(&upload.key)));
        xml.push_str(&format!("\n    <UploadId>{}</UploadId>", upload.upload_id));
        xml.push_str("\n  </Upload>");
    }
    xml.push_str("\n</ListMultipartUploadsResult>");
    xml
}

pub fn list_parts_response(bucket: &str, key: &str, upload_id: Uuid, parts: &[UploadPart], is_truncated: bool) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<ListPartsResult xmlns=\"{}\">", XML_NS));
    xml.push_str(&format!("\n  <Bucket>{}</Bucket>", xml_escape(bucket)));
    xml.push_str(&format!("\n  <Key>{}</Key>", xml_escape(key)));
    xml.push_str(&format!("\n  <UploadId>{}</UploadId>", upload_id));
    xml.push_str(&format!("\n  <IsTruncated>{}</IsTruncated>", is_truncated));
    for part in parts {
        xml.push_str("\n  <Part>");
        xml.push_str(&format!("\n    <PartNumber>{}</PartNumber>", part.part_number));
        xml.push_str(&format!("\n    <ETag>&quot;{}&quot;</ETag>", xml_escape(&part.etag)));
        xml.push_str("\n  </Part>");
    }
    xml.push_str("\n</ListPartsResult>");
    xml
}

pub fn delete_objects_response(deleted: &[String], errors: &[(String, String)]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(&format!("\n<DeleteResult xmlns=\"{}\">", XML_NS));
    for key in deleted {
        xml.push_str("\n  <Deleted>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(key)));
        xml.push_str("\n  </Deleted>");
    }
    for (key, message) in errors {
        xml.push_str("\n  <Error>");
        xml.push_str(&format!("\n    <Key>{}</Key>", xml_escape(key)));
        xml.push_str(&format!("\n    <Code>InternalError</Code>"));
        xml.push_str(&format!("\n    <Message>{}</Message>", xml_escape(message)));
        xml.push_str("\n  </Error>");
    }
    xml.push_str("\n</DeleteResult>");
    xml
}

#[derive(Deserialize)]
struct DeleteXmlObject {
    #[serde(rename = "Key")]
    key: String,
}

#[derive(Deserialize)]
struct DeleteXmlRequest {
    #[serde(rename = "Object", default)]
    object: Vec<DeleteXmlObject>,
}

/// Parses a batch-delete request body (spec.md §4.11 `DeleteObjects`).
pub fn parse_delete_request(body: &str) -> Result<Vec<String>> {
    let parsed: DeleteXmlRequest =
        quick_xml::de::from_str(body).map_err(|e| Error::InvalidRequest(format!("invalid Delete XML body: {e}")))?;
    Ok(parsed.object.into_iter().map(|o| o.key).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_object_keys_in_list_response() {
        let objects = [ListedObject { key: "a&b<c>.txt".to_string(), size: 1, etag: Uuid::nil(), last_modified: Utc::now() }];
        let params = ListObjectsV1Params { prefix: None, delimiter: None, marker: None, max_keys: 1000 };
        let xml = list_objects_v1_response("photos", &params, &objects, &[], false, None);
        assert!(xml.contains("a&amp;b&lt;c&gt;.txt"));
        assert!(!xml.contains("a&b<c>.txt"));
    }

    #[test]
    fn parses_delete_objects_request_body() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Delete>
  <Object><Key>a.txt</Key></Object>
  <Object><Key>dir/b.txt</Key></Object>
</Delete>"#;
        let keys = parse_delete_request(body).unwrap();
        assert_eq!(keys, vec!["a.txt".to_string(), "dir/b.txt".to_string()]);
    }
}
