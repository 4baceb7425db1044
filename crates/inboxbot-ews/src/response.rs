//! EWS response parsing.
//!
//! Walks the SOAP reply with a pull parser and keeps only what the client
//! needs: per-operation response status, items and their attachments, and
//! SOAP faults. Namespace prefixes are ignored.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::soap::ItemRef;
use inboxbot_scheduler::Attachment;

/// Elements that hold one mailbox item inside `<Items>`.
const ITEM_ELEMENTS: &[&str] = &[
    "Message",
    "Item",
    "PostItem",
    "MeetingMessage",
    "MeetingRequest",
    "MeetingResponse",
    "MeetingCancellation",
];

/// Status of one `*ResponseMessage` element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseStatus {
    /// `Success`, `Warning` or `Error`.
    pub class: String,
    pub code: Option<String>,
    pub text: Option<String>,
}

impl ResponseStatus {
    pub fn is_error(&self) -> bool {
        self.class == "Error"
    }
}

/// A SOAP fault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    /// EWS response code from the fault detail, if any.
    pub code: Option<String>,
}

/// One item from `FindItem` or `GetItem`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedItem {
    pub id: Option<ItemRef>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub from: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
}

impl ParsedItem {
    /// Sender address, falling back to the From header.
    pub fn sender_address(&self) -> Option<&str> {
        self.sender.as_deref().or(self.from.as_deref())
    }
}

/// Everything we read from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EwsResponse {
    pub statuses: Vec<ResponseStatus>,
    pub items: Vec<ParsedItem>,
    pub fault: Option<Fault>,
}

impl EwsResponse {
    /// First error status, if any.
    pub fn first_error(&self) -> Option<&ResponseStatus> {
        self.statuses.iter().find(|s| s.is_error())
    }
}

/// Parse an EWS SOAP response.
pub fn parse(xml: &str) -> Result<EwsResponse, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parser = Parser::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                parser.open(&e);
                parser.stack.push(local_name(&e));
            }
            Event::Empty(e) => {
                parser.open(&e);
                parser.stack.push(local_name(&e));
                parser.close();
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                parser.text(&text);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                parser.text(&text);
            }
            Event::End(_) => parser.close(),
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(parser.response)
}

#[derive(Default)]
struct Parser {
    stack: Vec<String>,
    response: EwsResponse,
    status: Option<ResponseStatus>,
    item: Option<ParsedItem>,
    attachment: Option<Attachment>,
    fault: Option<Fault>,
}

impl Parser {
    fn parent(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    fn within(&self, name: &str) -> bool {
        self.stack.iter().any(|n| n == name)
    }

    /// Called before the element is pushed.
    fn open(&mut self, e: &BytesStart<'_>) {
        let name = local_name(e);

        if name.ends_with("ResponseMessage") {
            self.status = Some(ResponseStatus {
                class: attribute(e, "ResponseClass").unwrap_or_default(),
                ..ResponseStatus::default()
            });
        } else if name == "Fault" {
            self.fault = Some(Fault::default());
        } else if self.parent() == Some("Items") && ITEM_ELEMENTS.contains(&name.as_str()) {
            self.item = Some(ParsedItem::default());
        } else if name == "ItemId" && self.item.is_some() && self.attachment.is_none() {
            if let (Some(item), Some(id)) = (self.item.as_mut(), attribute(e, "Id")) {
                item.id = Some(ItemRef {
                    id,
                    change_key: attribute(e, "ChangeKey"),
                });
            }
        } else if (name == "FileAttachment" || name == "ItemAttachment") && self.item.is_some() {
            self.attachment = Some(Attachment {
                name: None,
                size: None,
            });
        }
    }

    fn close(&mut self) {
        let Some(name) = self.stack.pop() else {
            return;
        };

        if name.ends_with("ResponseMessage") {
            if let Some(status) = self.status.take() {
                self.response.statuses.push(status);
            }
        } else if name == "Fault" {
            self.response.fault = self.fault.take();
        } else if (name == "FileAttachment" || name == "ItemAttachment") && self.attachment.is_some() {
            if let (Some(item), Some(attachment)) = (self.item.as_mut(), self.attachment.take()) {
                item.attachments.push(attachment);
            }
        } else if self.parent() == Some("Items") && ITEM_ELEMENTS.contains(&name.as_str()) {
            if let Some(item) = self.item.take() {
                self.response.items.push(item);
            }
        }
    }

    fn text(&mut self, text: &str) {
        let Some(current) = self.stack.last().cloned() else {
            return;
        };

        if let Some(fault) = self.fault.as_mut() {
            match current.as_str() {
                "faultstring" => fault.message = text.to_string(),
                "ResponseCode" => fault.code = Some(text.to_string()),
                _ => {}
            }
            return;
        }

        if let Some(attachment) = self.attachment.as_mut() {
            match current.as_str() {
                "Name" => attachment.name = Some(text.to_string()),
                "Size" => attachment.size = text.parse().ok(),
                _ => {}
            }
            return;
        }

        if self.item.is_some() {
            let in_sender = self.within("Sender");
            let in_from = self.within("From");
            if let Some(item) = self.item.as_mut() {
                match current.as_str() {
                    "Subject" => item.subject = Some(text.to_string()),
                    "EmailAddress" if in_sender => item.sender = Some(text.to_string()),
                    "EmailAddress" if in_from => item.from = Some(text.to_string()),
                    "DateTimeReceived" => {
                        item.received_at = DateTime::parse_from_rfc3339(text)
                            .ok()
                            .map(|at| at.with_timezone(&Utc));
                    }
                    "HasAttachments" => item.has_attachments = text.eq_ignore_ascii_case("true"),
                    _ => {}
                }
            }
            return;
        }

        if let Some(status) = self.status.as_mut() {
            match current.as_str() {
                "ResponseCode" => status.code = Some(text.to_string()),
                "MessageText" => status.text = Some(text.to_string()),
                _ => {}
            }
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const FIND_ITEM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <m:FindItemResponse xmlns:m="http://schemas.microsoft.com/exchange/services/2006/messages"
                        xmlns:t="http://schemas.microsoft.com/exchange/services/2006/types">
      <m:ResponseMessages>
        <m:FindItemResponseMessage ResponseClass="Success">
          <m:ResponseCode>NoError</m:ResponseCode>
          <m:RootFolder TotalItemsInView="2" IncludesLastItemInRange="true">
            <t:Items>
              <t:Message>
                <t:ItemId Id="AAMkA1" ChangeKey="CQAAA1"/>
                <t:Subject>Exam schedule &amp; rooms</t:Subject>
                <t:DateTimeReceived>2025-03-01T09:30:00Z</t:DateTimeReceived>
                <t:HasAttachments>true</t:HasAttachments>
                <t:Sender>
                  <t:Mailbox>
                    <t:Name>Dean's Office</t:Name>
                    <t:EmailAddress>dean@spbstu.ru</t:EmailAddress>
                  </t:Mailbox>
                </t:Sender>
              </t:Message>
              <t:MeetingRequest>
                <t:ItemId Id="AAMkA2" ChangeKey="CQAAA2"/>
                <t:Subject>Sync</t:Subject>
                <t:HasAttachments>false</t:HasAttachments>
                <t:From>
                  <t:Mailbox>
                    <t:EmailAddress>lead@spbstu.ru</t:EmailAddress>
                  </t:Mailbox>
                </t:From>
              </t:MeetingRequest>
            </t:Items>
          </m:RootFolder>
        </m:FindItemResponseMessage>
      </m:ResponseMessages>
    </m:FindItemResponse>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn test_parse_find_item() {
        let response = parse(FIND_ITEM).unwrap();

        assert_eq!(response.statuses.len(), 1);
        assert!(response.first_error().is_none());
        assert_eq!(response.items.len(), 2);

        let first = &response.items[0];
        assert_eq!(
            first.id,
            Some(ItemRef {
                id: "AAMkA1".to_string(),
                change_key: Some("CQAAA1".to_string()),
            })
        );
        assert_eq!(first.subject.as_deref(), Some("Exam schedule & rooms"));
        assert_eq!(first.sender_address(), Some("dean@spbstu.ru"));
        assert_eq!(
            first.received_at.map(|at| at.to_rfc3339()),
            Some("2025-03-01T09:30:00+00:00".to_string())
        );
        assert!(first.has_attachments);

        let second = &response.items[1];
        assert_eq!(second.sender_address(), Some("lead@spbstu.ru"));
        assert!(second.received_at.is_none());
        assert!(!second.has_attachments);
    }

    #[test]
    fn test_parse_get_item_attachments() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
            <m:GetItemResponse xmlns:m="m" xmlns:t="t"><m:ResponseMessages>
              <m:GetItemResponseMessage ResponseClass="Success">
                <m:ResponseCode>NoError</m:ResponseCode>
                <m:Items>
                  <t:Message>
                    <t:ItemId Id="AAMkA1" ChangeKey="CQAAA1"/>
                    <t:Attachments>
                      <t:FileAttachment>
                        <t:AttachmentId Id="att1"/>
                        <t:Name>schedule.pdf</t:Name>
                        <t:Size>52311</t:Size>
                      </t:FileAttachment>
                      <t:ItemAttachment>
                        <t:AttachmentId Id="att2"/>
                        <t:Name>Forwarded</t:Name>
                      </t:ItemAttachment>
                    </t:Attachments>
                  </t:Message>
                </m:Items>
              </m:GetItemResponseMessage>
            </m:ResponseMessages></m:GetItemResponse>
        </s:Body></s:Envelope>"#;

        let response = parse(xml).unwrap();
        assert_eq!(response.items.len(), 1);
        let item = &response.items[0];
        // AttachmentId must not overwrite the item id
        assert_eq!(item.id.as_ref().map(|r| r.id.as_str()), Some("AAMkA1"));
        assert_eq!(
            item.attachments,
            vec![
                Attachment {
                    name: Some("schedule.pdf".to_string()),
                    size: Some(52311),
                },
                Attachment {
                    name: Some("Forwarded".to_string()),
                    size: None,
                },
            ]
        );
    }

    #[test]
    fn test_parse_error_status() {
        let xml = r#"<s:Envelope xmlns:s="s"><s:Body><m:UpdateItemResponse xmlns:m="m">
            <m:ResponseMessages>
              <m:UpdateItemResponseMessage ResponseClass="Error">
                <m:MessageText>The specified object was not found in the store.</m:MessageText>
                <m:ResponseCode>ErrorItemNotFound</m:ResponseCode>
              </m:UpdateItemResponseMessage>
            </m:ResponseMessages>
        </m:UpdateItemResponse></s:Body></s:Envelope>"#;

        let response = parse(xml).unwrap();
        let error = response.first_error().unwrap();
        assert_eq!(error.code.as_deref(), Some("ErrorItemNotFound"));
        assert_eq!(
            error.text.as_deref(),
            Some("The specified object was not found in the store.")
        );
    }

    #[test]
    fn test_parse_soap_fault() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
            <s:Fault>
              <faultcode xmlns:a="a">a:ErrorServerBusy</faultcode>
              <faultstring xml:lang="en-US">The server cannot service this request right now. Try again later.</faultstring>
              <detail>
                <e:ResponseCode xmlns:e="e">ErrorServerBusy</e:ResponseCode>
                <e:Message xmlns:e="e">The server cannot service this request right now.</e:Message>
              </detail>
            </s:Fault>
        </s:Body></s:Envelope>"#;

        let response = parse(xml).unwrap();
        let fault = response.fault.unwrap();
        assert_eq!(fault.code.as_deref(), Some("ErrorServerBusy"));
        assert!(fault.message.starts_with("The server cannot service"));
        assert!(response.items.is_empty());
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse("<a><b></a>").is_err());
    }
}
